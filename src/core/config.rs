//! Run configuration.
//!
//! Every field has a default, so an empty `estate.toml` is valid:
//!
//! ```toml
//! start_year = 2025
//! listings_per_year = 4
//!
//! [settings]
//! seed = "harbor"
//! difficulty = "hard"
//! ```

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::error::Result;
use super::rng::seed_from_text;
use super::types::Difficulty;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub seed: Option<String>,
    pub difficulty: Difficulty,
}

impl Settings {
    pub fn resolve_seed(&self) -> u32 {
        match self.seed.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => seed_from_text(text),
            _ => {
                let nanos = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_nanos())
                    .unwrap_or_default();
                seed_from_text(&nanos.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub settings: Settings,
    pub start_year: u32,
    pub listings_per_year: usize,
    pub closing_cost_pct: f64,
    pub sale_cost_pct: f64,
    pub construction_ltc: f64,
    pub acquisition_ltv: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            start_year: 2025,
            listings_per_year: 4,
            closing_cost_pct: 0.01,
            sale_cost_pct: 0.02,
            construction_ltc: 0.60,
            acquisition_ltv: 0.65,
        }
    }
}

impl SimConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SimConfig = toml::from_str(text)?;
        Ok(config.sanitized())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    fn sanitized(mut self) -> Self {
        self.closing_cost_pct = self.closing_cost_pct.clamp(0.0, 0.10);
        self.sale_cost_pct = self.sale_cost_pct.clamp(0.0, 0.10);
        self.construction_ltc = self.construction_ltc.clamp(0.0, 0.90);
        self.acquisition_ltv = self.acquisition_ltv.clamp(0.0, 0.90);
        self
    }
}
