use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("unknown neighborhood: {0}")]
    UnknownNeighborhood(String),

    #[error("unknown product type: {0}")]
    UnknownProductType(String),

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("unknown deal: {0}")]
    UnknownDeal(String),

    #[error("invalid reference data: {0}")]
    InvalidReferenceData(String),

    #[error("file system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
