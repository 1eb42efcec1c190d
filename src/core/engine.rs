use serde::{Deserialize, Serialize};

use super::config::SimConfig;
use super::data::ReferenceData;
use super::error::{Result, SimError};
use super::finance::{compute_noi, value_from_noi};
use super::market::{
    AppliedEvent, advance_market, advance_neighborhood, apply_event, draw_balloon_years,
    draw_event, draw_loan_rate,
};
use super::portfolio::{
    PortfolioSnapshot, PropertySnapshot, find_neighborhood, portfolio_snapshot, snapshot_for,
};
use super::rng::Rng;
use super::types::{
    BuildPhase, BuildState, Difficulty, Lease, LeaseProfile, Listing, Loan, LoanTerms, Market,
    MAX_RENO_LEVEL, Neighborhood, Property,
};

const PERMANENT_AMORT_YEARS: u32 = 30;
const CONSTRUCTION_RATE_PREMIUM: f64 = 0.01;
const RENO_RENT_STEP: f64 = 0.03;
const RENO_RENT_CAP: f64 = 1.35;
const RENO_VACANCY_STEP: f64 = 0.005;
const RENO_VACANCY_FLOOR: f64 = -0.08;
const RENO_LEASE_NUDGE: f64 = 1.01;

/// Everything a run owns. This is the persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub seed: u32,
    pub difficulty: Difficulty,
    pub year: u32,
    pub cash: f64,
    pub market: Market,
    pub neighborhoods: Vec<Neighborhood>,
    pub properties: Vec<Property>,
    #[serde(default)]
    pub listings: Vec<Listing>,
    pub rng: Rng,
    pub next_id: u64,
    #[serde(default)]
    pub pending_event: Option<String>,
    #[serde(default)]
    pub config: SimConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleReport {
    pub property_id: u64,
    pub name: String,
    pub price: f64,
    pub friction: f64,
    pub loan_payoff: f64,
    pub net_proceeds: f64,
    pub forced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinanceReport {
    pub property_id: u64,
    pub old_balance: f64,
    pub new_balance: f64,
    pub rate: f64,
    /// Positive for cash-out, negative when the owner paid down the gap.
    pub cash_delta: f64,
    pub maturity_year: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRecord {
    pub year: u32,
    pub event: Option<AppliedEvent>,
    pub market: Market,
    pub stabilized: Vec<u64>,
    pub refinances: Vec<RefinanceReport>,
    pub forced_sales: Vec<SaleReport>,
    pub cash_floored: bool,
    pub portfolio: PortfolioSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    #[serde(rename_all = "camelCase")]
    Buy { listing_id: u64 },
    #[serde(rename_all = "camelCase")]
    Sell { property_id: u64 },
    #[serde(rename_all = "camelCase")]
    Renovate { property_id: u64 },
    #[serde(rename_all = "camelCase")]
    StartConstruction {
        neighborhood_id: String,
        product_type_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ScheduleEvent { event_id: String },
    AdvanceYear,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum Rejection {
    /// Also covers a voluntary sale whose loan payoff exceeds proceeds plus
    /// cash. Forced sales never reject.
    InsufficientFunds { needed: f64, available: f64 },
    UnknownListing { listing_id: u64 },
    UnknownProperty { property_id: u64 },
    MaxRenovation,
    UnderConstruction,
    ZoningNotAllowed {
        neighborhood_id: String,
        product_type_id: String,
    },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientFunds { needed, available } => {
                write!(f, "insufficient funds: need {needed:.0}, have {available:.0}")
            }
            Self::UnknownListing { listing_id } => write!(f, "no listing {listing_id}"),
            Self::UnknownProperty { property_id } => write!(f, "no property {property_id}"),
            Self::MaxRenovation => write!(f, "already renovated to level {MAX_RENO_LEVEL}"),
            Self::UnderConstruction => write!(f, "property is still being built"),
            Self::ZoningNotAllowed {
                neighborhood_id,
                product_type_id,
            } => write!(f, "{neighborhood_id} is not zoned for {product_type_id}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum CommandOutcome {
    #[serde(rename_all = "camelCase")]
    Purchased { property_id: u64, equity: f64 },
    Sold(SaleReport),
    #[serde(rename_all = "camelCase")]
    Renovated {
        property_id: u64,
        level: u8,
        cost: f64,
    },
    #[serde(rename_all = "camelCase")]
    ConstructionStarted {
        property_id: u64,
        cost: f64,
        equity: f64,
    },
    #[serde(rename_all = "camelCase")]
    EventScheduled { event_id: String },
    YearAdvanced(YearRecord),
    Rejected(Rejection),
}

impl CommandOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, CommandOutcome::Rejected(_))
    }
}

/// Run context: reference data plus the mutable run state it drives.
///
/// Lifecycle is `new` (or `restore`) → `advance_year`* → persist or drop.
#[derive(Debug, Clone)]
pub struct Simulation {
    data: ReferenceData,
    pub(crate) state: RunState,
    history: Vec<YearRecord>,
}

fn new_lease(profile: LeaseProfile, market_rent: f64, rng: &mut Rng) -> Lease {
    Lease {
        years_remaining: rng.int_inclusive(profile.min_term_years, profile.max_term_years) as i32,
        roll_pct: profile.roll_pct.clamp(0.0, 1.0),
        lease_rent_index: market_rent,
    }
}

/// Partial mark-to-market every year, full reset to market on expiry.
pub fn roll_lease(lease: &mut Lease, market_rent: f64, profile: LeaseProfile, rng: &mut Rng) {
    lease.lease_rent_index =
        lease.lease_rent_index * (1.0 - lease.roll_pct) + market_rent * lease.roll_pct;
    lease.years_remaining -= 1;
    if lease.years_remaining <= 0 {
        lease.years_remaining =
            rng.int_inclusive(profile.min_term_years, profile.max_term_years) as i32;
        lease.lease_rent_index = market_rent;
    }
}

/// Cost of taking a property to `level`, bounded to [200k, 5M].
pub fn renovation_cost(value: f64, level: u8) -> f64 {
    let step = 1.0 + 0.35 * (level.max(1) - 1) as f64;
    (0.03 * value * step).clamp(200_000.0, 5_000_000.0)
}

impl Simulation {
    pub fn new(data: ReferenceData, config: SimConfig) -> Result<Self> {
        let seed = config.settings.resolve_seed();
        Self::with_seed(data, config, seed)
    }

    pub fn with_seed(data: ReferenceData, config: SimConfig, seed: u32) -> Result<Self> {
        let difficulty = config.settings.difficulty;
        let state = RunState {
            seed,
            difficulty,
            year: config.start_year,
            cash: difficulty.starting_cash(),
            market: Market::default(),
            neighborhoods: data.neighborhoods.clone(),
            properties: Vec::new(),
            listings: Vec::new(),
            rng: Rng::new(seed),
            next_id: 1,
            pending_event: None,
            config,
        };
        let mut sim = Self {
            data,
            state,
            history: Vec::new(),
        };
        sim.generate_listings()?;
        tracing::info!(seed, ?difficulty, "run created");
        Ok(sim)
    }

    /// Rebuilds a run from a snapshot, backfilling fields older snapshots lack.
    pub fn restore(data: ReferenceData, state: RunState) -> Result<Self> {
        let mut sim = Self {
            data,
            state,
            history: Vec::new(),
        };
        sim.check_structure()?;
        sim.validate_references()?;
        let touched = sim.backfill()?;
        if touched > 0 {
            tracing::info!(touched, "backfilled properties from older snapshot");
        }
        Ok(sim)
    }

    pub fn data(&self) -> &ReferenceData {
        &self.data
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn history(&self) -> &[YearRecord] {
        &self.history
    }

    pub fn listings(&self) -> &[Listing] {
        &self.state.listings
    }

    pub fn portfolio(&self) -> Result<PortfolioSnapshot> {
        let s = &self.state;
        portfolio_snapshot(&s.properties, &s.neighborhoods, &self.data, s.cash)
    }

    pub fn property_snapshot(&self, property_id: u64) -> Result<Option<PropertySnapshot>> {
        self.state
            .properties
            .iter()
            .find(|p| p.id == property_id)
            .map(|p| snapshot_for(p, &self.state.neighborhoods, &self.data))
            .transpose()
    }

    pub fn property_snapshots(&self) -> Result<Vec<PropertySnapshot>> {
        self.state
            .properties
            .iter()
            .map(|p| snapshot_for(p, &self.state.neighborhoods, &self.data))
            .collect()
    }

    pub fn execute(&mut self, command: Command) -> Result<CommandOutcome> {
        match command {
            Command::Buy { listing_id } => self.buy(listing_id),
            Command::Sell { property_id } => self.sell(property_id),
            Command::Renovate { property_id } => self.renovate(property_id),
            Command::StartConstruction {
                neighborhood_id,
                product_type_id,
            } => self.start_construction(&neighborhood_id, &product_type_id),
            Command::ScheduleEvent { event_id } => self.schedule_event(&event_id),
            Command::AdvanceYear => self.advance_year().map(CommandOutcome::YearAdvanced),
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.state.next_id;
        self.state.next_id += 1;
        id
    }

    /// Loaded snapshots may be hand-edited: reject shapes the year loop cannot
    /// draw from and pull bounded fields back into range.
    fn check_structure(&mut self) -> Result<()> {
        let s = &mut self.state;
        if s.neighborhoods.is_empty() {
            return Err(SimError::InvalidReferenceData(
                "snapshot has no neighborhoods".to_string(),
            ));
        }
        if let Some(n) = s.neighborhoods.iter().find(|n| n.zoning.is_empty()) {
            return Err(SimError::InvalidReferenceData(format!(
                "neighborhood {} allows no product types",
                n.id
            )));
        }
        s.market.clamp_in_place();
        for n in s.neighborhoods.iter_mut() {
            n.clamp_in_place();
        }
        Ok(())
    }

    /// Every weak reference must resolve before a year may mutate anything.
    fn validate_references(&self) -> Result<()> {
        let s = &self.state;
        for p in &s.properties {
            find_neighborhood(&s.neighborhoods, &p.neighborhood_id)?;
            self.data.product_type(&p.product_type_id)?;
        }
        for l in &s.listings {
            find_neighborhood(&s.neighborhoods, &l.neighborhood_id)?;
            self.data.product_type(&l.product_type_id)?;
        }
        if let Some(event_id) = &s.pending_event {
            self.data.event(event_id)?;
        }
        Ok(())
    }

    /// One-shot migration for snapshots missing lease or maturity data.
    fn backfill(&mut self) -> Result<usize> {
        let data = &self.data;
        let RunState {
            properties,
            neighborhoods,
            rng,
            year,
            ..
        } = &mut self.state;

        let mut touched = 0;
        for p in properties.iter_mut().filter(|p| p.build.is_none()) {
            let mut changed = false;
            if p.lease.is_none() {
                let market_rent = find_neighborhood(neighborhoods, &p.neighborhood_id)?.rent_index;
                let profile = data.product_type(&p.product_type_id)?.lease;
                p.lease = Some(new_lease(profile, market_rent, rng));
                changed = true;
            }
            if p.loan.maturity_year.is_none() {
                p.loan.maturity_year = Some(*year + draw_balloon_years(rng));
                changed = true;
            }
            if p.loan.amort_years == 0 {
                p.loan.amort_years = PERMANENT_AMORT_YEARS;
                changed = true;
            }
            if changed {
                touched += 1;
            }
        }
        Ok(touched)
    }

    pub fn advance_year(&mut self) -> Result<YearRecord> {
        self.validate_references()?;
        let year = self.state.year;

        let event = {
            let data = &self.data;
            let s = &mut self.state;
            advance_market(&mut s.market, &mut s.rng);
            let chosen = match s.pending_event.take() {
                Some(id) => Some(data.event(&id)?),
                None => draw_event(&data.events, &mut s.rng),
            };
            let applied =
                chosen.map(|e| apply_event(e, &mut s.market, &mut s.neighborhoods, &mut s.rng));
            for n in s.neighborhoods.iter_mut() {
                advance_neighborhood(n, &s.market, &mut s.rng);
            }
            applied
        };
        tracing::debug!(
            year,
            base_rate = self.state.market.base_rate,
            spread = self.state.market.spread,
            liquidity = self.state.market.liquidity,
            "market advanced"
        );

        self.advance_leases()?;
        let stabilized = self.advance_build_phases()?;
        let (refinances, forced_sales, cash_floored) = self.resolve_maturities()?;
        self.apply_operations()?;
        self.generate_listings()?;

        self.state.year += 1;
        let record = YearRecord {
            year,
            event,
            market: self.state.market,
            stabilized,
            refinances,
            forced_sales,
            cash_floored,
            portfolio: self.portfolio()?,
        };
        tracing::info!(
            year,
            cash = record.portfolio.cash,
            equity = record.portfolio.equity,
            properties = record.portfolio.property_count,
            "year advanced"
        );
        self.history.push(record.clone());
        Ok(record)
    }

    fn advance_leases(&mut self) -> Result<()> {
        let data = &self.data;
        let RunState {
            properties,
            neighborhoods,
            rng,
            ..
        } = &mut self.state;

        for p in properties.iter_mut().filter(|p| p.build.is_none()) {
            let market_rent = find_neighborhood(neighborhoods, &p.neighborhood_id)?.rent_index;
            let profile = data.product_type(&p.product_type_id)?.lease;
            let lease = p
                .lease
                .get_or_insert_with(|| new_lease(profile, market_rent, rng));
            roll_lease(lease, market_rent, profile, rng);
        }
        Ok(())
    }

    fn advance_build_phases(&mut self) -> Result<Vec<u64>> {
        let data = &self.data;
        let RunState {
            properties,
            neighborhoods,
            market,
            rng,
            year,
            ..
        } = &mut self.state;

        let mut stabilized = Vec::new();
        for p in properties.iter_mut() {
            let Some(mut build) = p.build else {
                continue;
            };
            let product = data.product_type(&p.product_type_id)?;
            match build.phase {
                BuildPhase::Construction { years_remaining } => {
                    let left = years_remaining - 1;
                    if left <= 0 {
                        build.phase = BuildPhase::LeaseUp {
                            stabilize_years_remaining: product.years_to_stabilize as i32,
                        };
                        p.vacancy_delta = p.vacancy_delta.max(product.lease_up_vacancy);
                        tracing::info!(property = p.id, "construction complete, leasing up");
                    } else {
                        build.phase = BuildPhase::Construction {
                            years_remaining: left,
                        };
                    }
                    p.build = Some(build);
                }
                BuildPhase::LeaseUp {
                    stabilize_years_remaining,
                } => {
                    let left = stabilize_years_remaining - 1;
                    if left <= 0 {
                        let market_rent =
                            find_neighborhood(neighborhoods, &p.neighborhood_id)?.rent_index;
                        p.build = None;
                        p.vacancy_delta = 0.0;
                        p.loan.interest_only = false;
                        p.loan.amort_years = PERMANENT_AMORT_YEARS;
                        p.loan.rate = draw_loan_rate(market, rng);
                        p.loan.maturity_year = Some(*year + draw_balloon_years(rng));
                        p.lease = Some(new_lease(product.lease, market_rent, rng));
                        stabilized.push(p.id);
                        tracing::info!(property = p.id, rate = p.loan.rate, "stabilized");
                    } else {
                        build.phase = BuildPhase::LeaseUp {
                            stabilize_years_remaining: left,
                        };
                        p.vacancy_delta = p.vacancy_delta.max(product.lease_up_vacancy);
                        p.build = Some(build);
                    }
                }
            }
        }
        Ok(stabilized)
    }

    /// The refi wall. Maturing loans are handled one at a time in portfolio
    /// order so an earlier forced sale can fund a later shortfall.
    fn resolve_maturities(&mut self) -> Result<(Vec<RefinanceReport>, Vec<SaleReport>, bool)> {
        let year = self.state.year;
        let ids: Vec<u64> = self
            .state
            .properties
            .iter()
            .filter(|p| p.build.is_none())
            .map(|p| p.id)
            .collect();

        let mut refinances = Vec::new();
        let mut forced_sales = Vec::new();
        let mut cash_floored = false;

        for id in ids {
            let Some(idx) = self.state.properties.iter().position(|p| p.id == id) else {
                continue;
            };
            let loan = self.state.properties[idx].loan;
            let Some(maturity_year) = loan.maturity_year else {
                let term = draw_balloon_years(&mut self.state.rng);
                self.state.properties[idx].loan.maturity_year = Some(year + term);
                continue;
            };
            if maturity_year > year {
                continue;
            }
            if loan.balance <= 0.0 {
                let term = draw_balloon_years(&mut self.state.rng);
                self.state.properties[idx].loan.maturity_year = Some(year + term);
                continue;
            }

            let value =
                snapshot_for(&self.state.properties[idx], &self.state.neighborhoods, &self.data)?
                    .value;
            let rate = draw_loan_rate(&self.state.market, &mut self.state.rng);
            let new_loan = (value * loan.ltv).max(0.0);
            let shortfall = loan.balance - new_loan;

            if shortfall > 0.0 && self.state.cash < shortfall {
                tracing::info!(
                    property = id,
                    shortfall,
                    cash = self.state.cash,
                    "refinance failed, forcing sale"
                );
                forced_sales.push(self.dispose(idx, true)?);
                if self.state.cash < 0.0 {
                    tracing::warn!(
                        cash = self.state.cash,
                        "cash floored at zero after forced sale"
                    );
                    self.state.cash = 0.0;
                    cash_floored = true;
                }
                continue;
            }

            self.state.cash -= shortfall;
            let term = draw_balloon_years(&mut self.state.rng);
            let p = &mut self.state.properties[idx];
            p.loan.balance = new_loan;
            p.loan.rate = rate;
            p.loan.amort_years = PERMANENT_AMORT_YEARS;
            p.loan.interest_only = false;
            p.loan.maturity_year = Some(year + term);
            tracing::debug!(property = id, new_loan, rate, "refinanced at maturity");
            refinances.push(RefinanceReport {
                property_id: id,
                old_balance: loan.balance,
                new_balance: new_loan,
                rate,
                cash_delta: -shortfall,
                maturity_year: year + term,
            });
        }

        Ok((refinances, forced_sales, cash_floored))
    }

    fn apply_operations(&mut self) -> Result<()> {
        let data = &self.data;
        let RunState {
            properties,
            neighborhoods,
            cash,
            ..
        } = &mut self.state;

        for p in properties.iter_mut() {
            let snap = snapshot_for(p, neighborhoods, data)?;
            *cash += snap.cash_flow;
            p.loan.balance = (p.loan.balance - snap.debt_service.principal).max(0.0);
        }
        Ok(())
    }

    fn generate_listings(&mut self) -> Result<()> {
        self.state.listings.clear();
        for _ in 0..self.state.config.listings_per_year {
            let id = self.next_id();
            let data = &self.data;
            let s = &mut self.state;

            let n = s
                .neighborhoods
                .get(s.rng.index(s.neighborhoods.len()))
                .ok_or_else(|| SimError::InvalidReferenceData("no neighborhoods".to_string()))?;
            let zoned = n
                .zoning
                .get(s.rng.index(n.zoning.len()))
                .ok_or_else(|| {
                    SimError::InvalidReferenceData(format!("{} has no zoning", n.id))
                })?;
            let product = data.product_type(zoned)?;
            let base_noi = (s.rng.range(300_000.0, 2_500_000.0) / 1_000.0).round() * 1_000.0;
            let vacancy_delta = s.rng.range(-0.02, 0.04);
            let cap_rate_delta = s.rng.range(-0.004, 0.006);

            let vacancy = (n.vacancy + vacancy_delta).clamp(0.0, 0.95);
            let cap_rate = (n.cap_rate + cap_rate_delta).clamp(0.03, 0.15);
            let noi = compute_noi(base_noi, n.rent_index, vacancy, product.base_expense_ratio);
            let premium = s.rng.range(0.95, 1.07);
            let price = (value_from_noi(noi, cap_rate) * premium / 10_000.0).round() * 10_000.0;

            let loan_terms = LoanTerms {
                ltv: s.config.acquisition_ltv,
                rate: draw_loan_rate(&s.market, &mut s.rng),
                amort_years: PERMANENT_AMORT_YEARS,
                balloon_years: draw_balloon_years(&mut s.rng),
            };

            let listing = Listing {
                id,
                name: format!("{} {} #{id}", n.name, product.name),
                neighborhood_id: n.id.clone(),
                product_type_id: product.id.clone(),
                base_noi,
                vacancy_delta,
                cap_rate_delta,
                price,
                loan_terms,
            };
            s.listings.push(listing);
        }
        Ok(())
    }

    pub fn buy(&mut self, listing_id: u64) -> Result<CommandOutcome> {
        let Some(pos) = self.state.listings.iter().position(|l| l.id == listing_id) else {
            return Ok(CommandOutcome::Rejected(Rejection::UnknownListing {
                listing_id,
            }));
        };

        let listing = &self.state.listings[pos];
        let loan_amount = listing.price * listing.loan_terms.ltv;
        let closing = listing.price * self.state.config.closing_cost_pct;
        let equity = listing.price - loan_amount + closing;
        if self.state.cash < equity {
            return Ok(CommandOutcome::Rejected(Rejection::InsufficientFunds {
                needed: equity,
                available: self.state.cash,
            }));
        }

        let market_rent =
            find_neighborhood(&self.state.neighborhoods, &listing.neighborhood_id)?.rent_index;
        let profile = self.data.product_type(&listing.product_type_id)?.lease;

        let listing = self.state.listings.remove(pos);
        let s = &mut self.state;
        s.cash -= equity;
        let lease = new_lease(profile, market_rent, &mut s.rng);
        let property = Property {
            id: listing.id,
            name: listing.name,
            neighborhood_id: listing.neighborhood_id,
            product_type_id: listing.product_type_id,
            base_noi: listing.base_noi,
            rent_index_mult: 1.0,
            vacancy_delta: listing.vacancy_delta,
            cap_rate_delta: listing.cap_rate_delta,
            reno_level: 0,
            loan: Loan {
                balance: loan_amount,
                rate: listing.loan_terms.rate,
                amort_years: listing.loan_terms.amort_years,
                interest_only: false,
                ltv: listing.loan_terms.ltv,
                maturity_year: Some(s.year + listing.loan_terms.balloon_years),
            },
            build: None,
            lease: Some(lease),
            acquired_year: s.year,
        };
        tracing::info!(property = property.id, price = listing.price, equity, "purchased");
        s.properties.push(property);

        Ok(CommandOutcome::Purchased {
            property_id: listing.id,
            equity,
        })
    }

    /// Voluntary sale. Rejected when an underwater payoff exceeds cash on hand.
    pub fn sell(&mut self, property_id: u64) -> Result<CommandOutcome> {
        let Some(idx) = self
            .state
            .properties
            .iter()
            .position(|p| p.id == property_id)
        else {
            return Ok(CommandOutcome::Rejected(Rejection::UnknownProperty {
                property_id,
            }));
        };

        let p = &self.state.properties[idx];
        let price = snapshot_for(p, &self.state.neighborhoods, &self.data)?.value;
        let net = price * (1.0 - self.state.config.sale_cost_pct) - p.loan.balance;
        if self.state.cash + net < 0.0 {
            return Ok(CommandOutcome::Rejected(Rejection::InsufficientFunds {
                needed: -net,
                available: self.state.cash,
            }));
        }

        Ok(CommandOutcome::Sold(self.dispose(idx, false)?))
    }

    /// Sells at the current valuation and removes the property whatever the
    /// sign of the proceeds.
    fn dispose(&mut self, idx: usize, forced: bool) -> Result<SaleReport> {
        let price = snapshot_for(
            &self.state.properties[idx],
            &self.state.neighborhoods,
            &self.data,
        )?
        .value;
        let property = self.state.properties.remove(idx);
        let friction = price * self.state.config.sale_cost_pct;
        let loan_payoff = property.loan.balance.max(0.0);
        let net_proceeds = price - friction - loan_payoff;
        self.state.cash += net_proceeds;

        tracing::info!(property = property.id, price, net_proceeds, forced, "sold");
        Ok(SaleReport {
            property_id: property.id,
            name: property.name,
            price,
            friction,
            loan_payoff,
            net_proceeds,
            forced,
        })
    }

    pub fn renovate(&mut self, property_id: u64) -> Result<CommandOutcome> {
        let Some(idx) = self
            .state
            .properties
            .iter()
            .position(|p| p.id == property_id)
        else {
            return Ok(CommandOutcome::Rejected(Rejection::UnknownProperty {
                property_id,
            }));
        };

        let p = &self.state.properties[idx];
        if p.build.is_some() {
            return Ok(CommandOutcome::Rejected(Rejection::UnderConstruction));
        }
        if p.reno_level >= MAX_RENO_LEVEL {
            return Ok(CommandOutcome::Rejected(Rejection::MaxRenovation));
        }

        let snap = snapshot_for(p, &self.state.neighborhoods, &self.data)?;
        let level = p.reno_level + 1;
        let cost = renovation_cost(snap.value, level);
        if self.state.cash < cost {
            return Ok(CommandOutcome::Rejected(Rejection::InsufficientFunds {
                needed: cost,
                available: self.state.cash,
            }));
        }

        let market_rent =
            find_neighborhood(&self.state.neighborhoods, &p.neighborhood_id)?.rent_index;
        let profile = self.data.product_type(&p.product_type_id)?.lease;

        let s = &mut self.state;
        s.cash -= cost;
        let p = &mut s.properties[idx];
        p.reno_level = level;
        p.rent_index_mult = (p.rent_index_mult + RENO_RENT_STEP).min(RENO_RENT_CAP);
        p.vacancy_delta = (p.vacancy_delta - RENO_VACANCY_STEP).max(RENO_VACANCY_FLOOR);
        let lease = p
            .lease
            .get_or_insert_with(|| new_lease(profile, market_rent, &mut s.rng));
        lease.lease_rent_index *= RENO_LEASE_NUDGE;

        tracing::info!(property = property_id, level, cost, "renovated");
        Ok(CommandOutcome::Renovated {
            property_id,
            level,
            cost,
        })
    }

    pub fn start_construction(
        &mut self,
        neighborhood_id: &str,
        product_type_id: &str,
    ) -> Result<CommandOutcome> {
        let n = find_neighborhood(&self.state.neighborhoods, neighborhood_id)?;
        let product = self.data.product_type(product_type_id)?;
        if !n.allows(product_type_id) {
            return Ok(CommandOutcome::Rejected(Rejection::ZoningNotAllowed {
                neighborhood_id: neighborhood_id.to_string(),
                product_type_id: product_type_id.to_string(),
            }));
        }

        let cost = product.base_build_cost * n.scarcity;
        let loan_amount = cost * self.state.config.construction_ltc;
        let equity = cost - loan_amount;
        if self.state.cash < equity {
            return Ok(CommandOutcome::Rejected(Rejection::InsufficientFunds {
                needed: equity,
                available: self.state.cash,
            }));
        }

        let name = format!("{} {} (new build)", n.name, product.name);
        let base_noi = cost * product.yield_on_cost;
        let years_to_build = product.years_to_build.max(1) as i32;
        let id = self.next_id();
        let s = &mut self.state;
        let rate = (draw_loan_rate(&s.market, &mut s.rng) + CONSTRUCTION_RATE_PREMIUM).min(0.18);
        s.cash -= equity;
        s.properties.push(Property {
            id,
            name,
            neighborhood_id: neighborhood_id.to_string(),
            product_type_id: product_type_id.to_string(),
            base_noi,
            rent_index_mult: 1.0,
            vacancy_delta: 0.0,
            cap_rate_delta: 0.0,
            reno_level: 0,
            loan: Loan {
                balance: loan_amount,
                rate,
                amort_years: PERMANENT_AMORT_YEARS,
                interest_only: true,
                ltv: s.config.acquisition_ltv,
                maturity_year: None,
            },
            build: Some(BuildState {
                phase: BuildPhase::Construction {
                    years_remaining: years_to_build,
                },
                cost_basis: cost,
            }),
            lease: None,
            acquired_year: s.year,
        });

        tracing::info!(property = id, cost, equity, "construction started");
        Ok(CommandOutcome::ConstructionStarted {
            property_id: id,
            cost,
            equity,
        })
    }

    pub fn schedule_event(&mut self, event_id: &str) -> Result<CommandOutcome> {
        self.data.event(event_id)?;
        self.state.pending_event = Some(event_id.to_string());
        Ok(CommandOutcome::EventScheduled {
            event_id: event_id.to_string(),
        })
    }
}
