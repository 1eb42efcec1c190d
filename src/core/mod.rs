mod config;
mod data;
mod engine;
mod error;
mod finance;
mod market;
mod persistence;
mod portfolio;
mod rng;
mod solver;
mod types;

pub use config::{Settings, SimConfig};
pub use data::ReferenceData;
pub use engine::{
    Command, CommandOutcome, RefinanceReport, Rejection, RunState, SaleReport, Simulation,
    YearRecord, renovation_cost, roll_lease,
};
pub use error::{Result, SimError};
pub use finance::{DebtService, annual_debt_service, compute_noi, dscr, value_from_noi};
pub use market::{AppliedEvent, demand_implied_vacancy, implied_cap_rate};
pub use persistence::{JsonFileStore, MemoryStore, RunStore};
pub use portfolio::{PortfolioSnapshot, PropertySnapshot, aggregate, property_snapshot};
pub use rng::{Rng, seed_from_text};
pub use solver::{IrrSolution, UnderwriteResult, UnderwriteYear, irr, npv, solve_irr, underwrite};
pub use types::{
    Deal, DealInputs, Difficulty, Lease, Listing, Loan, Market, MarketEvent, Neighborhood, Phase,
    ProductType, Property,
};
