use serde::{Deserialize, Serialize};

pub const BASE_RATE_BOUNDS: (f64, f64) = (0.0, 0.12);
pub const SPREAD_BOUNDS: (f64, f64) = (0.0, 0.08);
pub const LIQUIDITY_BOUNDS: (f64, f64) = (0.2, 1.0);
pub const DEMAND_BOUNDS: (f64, f64) = (0.2, 1.2);
pub const RENT_INDEX_BOUNDS: (f64, f64) = (0.6, 1.8);
pub const VACANCY_BOUNDS: (f64, f64) = (0.01, 0.35);
pub const CAP_RATE_BOUNDS: (f64, f64) = (0.03, 0.12);

pub const MAX_RENO_LEVEL: u8 = 3;
pub const MAX_HOLD_YEARS: u32 = 50;

pub(crate) fn bounded(value: f64, bounds: (f64, f64)) -> f64 {
    if value.is_nan() {
        return bounds.0;
    }
    value.clamp(bounds.0, bounds.1)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub base_rate: f64,
    pub spread: f64,
    pub liquidity: f64,
}

impl Market {
    pub fn clamp_in_place(&mut self) {
        self.base_rate = bounded(self.base_rate, BASE_RATE_BOUNDS);
        self.spread = bounded(self.spread, SPREAD_BOUNDS);
        self.liquidity = bounded(self.liquidity, LIQUIDITY_BOUNDS);
    }
}

impl Default for Market {
    fn default() -> Self {
        Self {
            base_rate: 0.04,
            spread: 0.02,
            liquidity: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Neighborhood {
    pub id: String,
    pub name: String,
    pub zoning: Vec<String>,
    pub base_demand: f64,
    pub demand: f64,
    pub rent_index: f64,
    pub vacancy: f64,
    pub cap_rate: f64,
    pub scarcity: f64,
}

impl Neighborhood {
    pub fn allows(&self, product_type_id: &str) -> bool {
        self.zoning.iter().any(|z| z == product_type_id)
    }

    pub fn clamp_in_place(&mut self) {
        self.demand = bounded(self.demand, DEMAND_BOUNDS);
        self.rent_index = bounded(self.rent_index, RENT_INDEX_BOUNDS);
        self.vacancy = bounded(self.vacancy, VACANCY_BOUNDS);
        self.cap_rate = bounded(self.cap_rate, CAP_RATE_BOUNDS);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseProfile {
    pub roll_pct: f64,
    pub min_term_years: u32,
    pub max_term_years: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductType {
    pub id: String,
    pub name: String,
    pub base_expense_ratio: f64,
    pub years_to_build: u32,
    pub years_to_stabilize: u32,
    pub lease_up_vacancy: f64,
    pub base_build_cost: f64,
    pub yield_on_cost: f64,
    pub lease: LeaseProfile,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventScope {
    Global,
    Neighborhood,
}

/// Additive one-shot shocks; absent fields are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventDeltas {
    pub base_rate: f64,
    pub spread: f64,
    pub liquidity: f64,
    pub demand: f64,
    pub vacancy: f64,
    pub rent_index: f64,
    pub cap_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketEvent {
    pub id: String,
    pub name: String,
    pub scope: EventScope,
    /// Neighborhood-scoped events without a target hit a random neighborhood.
    #[serde(default)]
    pub target: Option<String>,
    pub deltas: EventDeltas,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum BuildPhase {
    #[serde(rename_all = "camelCase")]
    Construction { years_remaining: i32 },
    #[serde(rename_all = "camelCase")]
    LeaseUp { stabilize_years_remaining: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildState {
    #[serde(flatten)]
    pub phase: BuildPhase,
    pub cost_basis: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Construction,
    LeaseUp,
    Stabilized,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub years_remaining: i32,
    pub roll_pct: f64,
    pub lease_rent_index: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub balance: f64,
    pub rate: f64,
    pub amort_years: u32,
    pub interest_only: bool,
    pub ltv: f64,
    /// Absent on snapshots written before balloon maturities existed.
    #[serde(default)]
    pub maturity_year: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: u64,
    pub name: String,
    pub neighborhood_id: String,
    pub product_type_id: String,
    pub base_noi: f64,
    pub rent_index_mult: f64,
    pub vacancy_delta: f64,
    pub cap_rate_delta: f64,
    #[serde(default)]
    pub reno_level: u8,
    pub loan: Loan,
    #[serde(default)]
    pub build: Option<BuildState>,
    /// `None` until first initialized; stabilized assets get one lazily.
    #[serde(default)]
    pub lease: Option<Lease>,
    pub acquired_year: u32,
}

impl Property {
    pub fn phase(&self) -> Phase {
        match self.build.map(|b| b.phase) {
            Some(BuildPhase::Construction { .. }) => Phase::Construction,
            Some(BuildPhase::LeaseUp { .. }) => Phase::LeaseUp,
            None => Phase::Stabilized,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanTerms {
    pub ltv: f64,
    pub rate: f64,
    pub amort_years: u32,
    pub balloon_years: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: u64,
    pub name: String,
    pub neighborhood_id: String,
    pub product_type_id: String,
    pub base_noi: f64,
    pub vacancy_delta: f64,
    pub cap_rate_delta: f64,
    pub price: f64,
    pub loan_terms: LoanTerms,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealDebt {
    pub ltv: f64,
    pub rate: f64,
    pub amort_years: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: String,
    pub name: String,
    pub neighborhood_id: String,
    pub product_type_id: String,
    pub purchase_price: f64,
    #[serde(rename = "inPlaceNOI", alias = "inPlaceNoi")]
    pub in_place_noi: f64,
    #[serde(rename = "marketNOILiftPct", alias = "marketNoiLiftPct")]
    pub market_noi_lift_pct: f64,
    pub debt: DealDebt,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DealInputs {
    pub rent_growth: f64,
    pub exit_cap: f64,
    pub capex: f64,
    pub hold_years: u32,
}

impl Default for DealInputs {
    fn default() -> Self {
        Self {
            rent_growth: 0.03,
            exit_cap: 0.06,
            capex: 0.0,
            hold_years: 5,
        }
    }
}

impl DealInputs {
    pub fn clamped(self) -> Self {
        Self {
            rent_growth: bounded(self.rent_growth, (-0.10, 0.15)),
            exit_cap: bounded(self.exit_cap, (0.03, 0.12)),
            capex: if self.capex.is_finite() {
                self.capex.max(0.0)
            } else {
                0.0
            },
            hold_years: self.hold_years.clamp(1, MAX_HOLD_YEARS),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Normal,
    Hard,
}

impl Difficulty {
    pub fn starting_cash(self) -> f64 {
        match self {
            Difficulty::Easy => 5_000_000.0,
            Difficulty::Normal => 2_500_000.0,
            Difficulty::Hard => 1_000_000.0,
        }
    }
}
