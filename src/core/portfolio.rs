use serde::Serialize;

use super::data::ReferenceData;
use super::error::{Result, SimError};
use super::finance::{DebtService, annual_debt_service, compute_noi, dscr, value_from_noi};
use super::types::{BuildPhase, Neighborhood, Phase, ProductType, Property};

const PROPERTY_CAP_RATE_BOUNDS: (f64, f64) = (0.03, 0.15);
const MAX_PROPERTY_VACANCY: f64 = 0.95;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySnapshot {
    pub id: u64,
    pub name: String,
    pub neighborhood_id: String,
    pub product_type_id: String,
    pub phase: Phase,
    pub rent_index: f64,
    pub vacancy: f64,
    pub cap_rate: f64,
    pub noi: f64,
    pub value: f64,
    pub debt_service: DebtService,
    pub dscr: f64,
    pub cash_flow: f64,
    pub loan_balance: f64,
    pub equity: f64,
    pub reno_level: u8,
    pub maturity_year: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    pub property_count: usize,
    pub value: f64,
    pub debt: f64,
    pub noi: f64,
    pub debt_service: f64,
    pub cash_flow: f64,
    pub dscr: f64,
    pub cash: f64,
    pub equity: f64,
}

pub(crate) fn find_neighborhood<'a>(
    neighborhoods: &'a [Neighborhood],
    id: &str,
) -> Result<&'a Neighborhood> {
    neighborhoods
        .iter()
        .find(|n| n.id == id)
        .ok_or_else(|| SimError::UnknownNeighborhood(id.to_string()))
}

/// Rent index the property actually earns: in-place lease rent when a lease
/// exists, otherwise the neighborhood's market rent.
pub fn effective_rent_index(property: &Property, neighborhood: &Neighborhood) -> f64 {
    let base = property
        .lease
        .map(|l| l.lease_rent_index)
        .unwrap_or(neighborhood.rent_index);
    base * property.rent_index_mult
}

pub fn property_snapshot(
    property: &Property,
    neighborhood: &Neighborhood,
    product: &ProductType,
) -> PropertySnapshot {
    let rent_index = effective_rent_index(property, neighborhood);
    let vacancy = (neighborhood.vacancy + property.vacancy_delta).clamp(0.0, MAX_PROPERTY_VACANCY);
    let cap_rate = (neighborhood.cap_rate + property.cap_rate_delta)
        .clamp(PROPERTY_CAP_RATE_BOUNDS.0, PROPERTY_CAP_RATE_BOUNDS.1);

    let (noi, value) = match property.build {
        Some(build) if matches!(build.phase, BuildPhase::Construction { .. }) => {
            (0.0, build.cost_basis)
        }
        _ => {
            let noi = compute_noi(
                property.base_noi,
                rent_index,
                vacancy,
                product.base_expense_ratio,
            );
            (noi, value_from_noi(noi, cap_rate))
        }
    };

    let loan = &property.loan;
    let debt_service = annual_debt_service(
        loan.balance,
        loan.rate,
        loan.amort_years,
        loan.interest_only,
    );

    PropertySnapshot {
        id: property.id,
        name: property.name.clone(),
        neighborhood_id: property.neighborhood_id.clone(),
        product_type_id: property.product_type_id.clone(),
        phase: property.phase(),
        rent_index,
        vacancy,
        cap_rate,
        noi,
        value,
        debt_service,
        dscr: dscr(noi, debt_service.payment),
        cash_flow: noi - debt_service.payment,
        loan_balance: loan.balance.max(0.0),
        equity: value - loan.balance.max(0.0),
        reno_level: property.reno_level,
        maturity_year: loan.maturity_year,
    }
}

pub fn snapshot_for(
    property: &Property,
    neighborhoods: &[Neighborhood],
    data: &ReferenceData,
) -> Result<PropertySnapshot> {
    let neighborhood = find_neighborhood(neighborhoods, &property.neighborhood_id)?;
    let product = data.product_type(&property.product_type_id)?;
    Ok(property_snapshot(property, neighborhood, product))
}

pub fn aggregate(snapshots: &[PropertySnapshot], cash: f64) -> PortfolioSnapshot {
    let mut total = PortfolioSnapshot {
        property_count: snapshots.len(),
        cash,
        ..PortfolioSnapshot::default()
    };
    for s in snapshots {
        total.value += s.value;
        total.debt += s.loan_balance;
        total.noi += s.noi;
        total.debt_service += s.debt_service.payment;
        total.cash_flow += s.cash_flow;
    }
    total.dscr = dscr(total.noi, total.debt_service);
    total.equity = total.value - total.debt + cash;
    total
}

pub fn portfolio_snapshot(
    properties: &[Property],
    neighborhoods: &[Neighborhood],
    data: &ReferenceData,
    cash: f64,
) -> Result<PortfolioSnapshot> {
    let snapshots = properties
        .iter()
        .map(|p| snapshot_for(p, neighborhoods, data))
        .collect::<Result<Vec<_>>>()?;
    Ok(aggregate(&snapshots, cash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BuildState, Lease, Loan};

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn neighborhood() -> Neighborhood {
        Neighborhood {
            id: "riverside".to_string(),
            name: "Riverside".to_string(),
            zoning: vec!["multifamily".to_string()],
            base_demand: 0.75,
            demand: 0.75,
            rent_index: 1.0,
            vacancy: 0.05,
            cap_rate: 0.05,
            scarcity: 1.0,
        }
    }

    fn data() -> ReferenceData {
        ReferenceData::bundled().expect("bundled data")
    }

    fn property(id: u64, balance: f64) -> Property {
        Property {
            id,
            name: format!("Asset {id}"),
            neighborhood_id: "riverside".to_string(),
            product_type_id: "multifamily".to_string(),
            base_noi: 500_000.0,
            rent_index_mult: 1.0,
            vacancy_delta: -0.05,
            cap_rate_delta: 0.0,
            reno_level: 0,
            loan: Loan {
                balance,
                rate: 0.05,
                amort_years: 30,
                interest_only: true,
                ltv: 0.65,
                maturity_year: Some(2030),
            },
            build: None,
            lease: None,
            acquired_year: 2025,
        }
    }

    #[test]
    fn stabilized_snapshot_values_noi_at_cap_rate() {
        let data = data();
        let product = data.product_type("multifamily").expect("product");
        let snap = property_snapshot(&property(1, 4_000_000.0), &neighborhood(), product);
        assert_eq!(snap.phase, Phase::Stabilized);
        assert_close(snap.vacancy, 0.0, 1e-12);
        assert_close(snap.noi, 500_000.0, 1e-6);
        assert_close(snap.value, 10_000_000.0, 1e-4);
        assert_close(snap.debt_service.payment, 200_000.0, 1e-9);
        assert_close(snap.dscr, 2.5, 1e-9);
        assert_close(snap.equity, 6_000_000.0, 1e-4);
    }

    #[test]
    fn lease_rent_index_overrides_market_rent() {
        let data = data();
        let product = data.product_type("multifamily").expect("product");
        let mut p = property(1, 0.0);
        p.lease = Some(Lease {
            years_remaining: 2,
            roll_pct: 0.5,
            lease_rent_index: 0.9,
        });
        p.rent_index_mult = 1.1;
        let snap = property_snapshot(&p, &neighborhood(), product);
        assert_close(snap.rent_index, 0.99, 1e-12);
        assert_eq!(snap.dscr, f64::INFINITY);
    }

    #[test]
    fn construction_is_carried_at_cost_with_no_income() {
        let data = data();
        let product = data.product_type("multifamily").expect("product");
        let mut p = property(1, 6_000_000.0);
        p.build = Some(BuildState {
            phase: BuildPhase::Construction { years_remaining: 2 },
            cost_basis: 10_000_000.0,
        });
        let snap = property_snapshot(&p, &neighborhood(), product);
        assert_eq!(snap.phase, Phase::Construction);
        assert_eq!(snap.noi, 0.0);
        assert_close(snap.value, 10_000_000.0, 1e-9);
        assert_close(snap.cash_flow, -300_000.0, 1e-9);
        assert_eq!(snap.dscr, 0.0);
    }

    #[test]
    fn aggregate_sums_and_adds_cash_to_equity() {
        let data = data();
        let neighborhoods = vec![neighborhood()];
        let props = vec![property(1, 4_000_000.0), property(2, 0.0)];
        let total =
            portfolio_snapshot(&props, &neighborhoods, &data, 250_000.0).expect("snapshot");
        assert_eq!(total.property_count, 2);
        assert_close(total.value, 20_000_000.0, 1e-3);
        assert_close(total.debt, 4_000_000.0, 1e-9);
        assert_close(total.noi, 1_000_000.0, 1e-6);
        assert_close(total.debt_service, 200_000.0, 1e-9);
        assert_close(total.cash_flow, 800_000.0, 1e-6);
        assert_close(total.dscr, 5.0, 1e-9);
        assert_close(total.equity, 16_250_000.0, 1e-3);
    }

    #[test]
    fn empty_portfolio_reports_cash_only() {
        let total = aggregate(&[], 1_000.0);
        assert_eq!(total.property_count, 0);
        assert_eq!(total.equity, 1_000.0);
        assert_eq!(total.dscr, f64::INFINITY);
    }

    #[test]
    fn missing_neighborhood_is_an_error() {
        let data = data();
        let mut p = property(1, 0.0);
        p.neighborhood_id = "atlantis".to_string();
        let err = snapshot_for(&p, &[neighborhood()], &data).expect_err("missing reference");
        assert!(matches!(err, SimError::UnknownNeighborhood(id) if id == "atlantis"));
    }
}
