use serde::Serialize;

use super::finance::{annual_debt_service, compute_noi};
use super::types::{Deal, DealInputs, Neighborhood, ProductType};

pub const IRR_SEARCH_MIN: f64 = -0.9;
pub const IRR_SEARCH_MAX: f64 = 1.5;
pub const IRR_MAX_ITERATIONS: u32 = 80;
pub const IRR_NPV_TOLERANCE: f64 = 1e-6;

/// Years over which in-place NOI ramps linearly to the market lift.
const LIFT_RAMP_YEARS: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IrrSolution {
    /// `None` when no root is bracketed by the search bounds.
    pub irr: Option<f64>,
    pub iterations: u32,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnderwriteYear {
    pub year: u32,
    pub base_noi: f64,
    pub rent_index: f64,
    pub noi: f64,
    pub debt_service: f64,
    pub principal: f64,
    pub capex: f64,
    pub cash_flow: f64,
    pub loan_balance: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnderwriteResult {
    pub deal_id: String,
    pub inputs: DealInputs,
    pub loan_amount: f64,
    pub equity_required: f64,
    pub years: Vec<UnderwriteYear>,
    pub exit_noi: f64,
    pub exit_value: f64,
    pub remaining_loan: f64,
    pub sale_net: f64,
    pub total_distributions: f64,
    pub equity_multiple: f64,
    pub irr: Option<f64>,
    pub irr_iterations: u32,
    pub message: String,
}

pub fn npv(rate: f64, cash_flows: &[f64]) -> f64 {
    let mut discount = 1.0;
    let mut total = 0.0;
    for (t, cf) in cash_flows.iter().enumerate() {
        if t > 0 {
            discount *= 1.0 + rate;
        }
        total += cf / discount;
    }
    total
}

/// Bisection IRR over `[IRR_SEARCH_MIN, IRR_SEARCH_MAX]`.
///
/// Refuses to guess: if NPV at either bound is non-finite or both bounds share
/// a sign, the result carries no IRR.
pub fn solve_irr(cash_flows: &[f64]) -> IrrSolution {
    let no_solution = IrrSolution {
        irr: None,
        iterations: 0,
        converged: false,
    };

    let mut lo = IRR_SEARCH_MIN;
    let mut hi = IRR_SEARCH_MAX;
    let npv_lo = npv(lo, cash_flows);
    let npv_hi = npv(hi, cash_flows);
    if !npv_lo.is_finite() || !npv_hi.is_finite() || npv_lo * npv_hi > 0.0 {
        return no_solution;
    }
    if npv_lo == 0.0 && npv_hi == 0.0 {
        return no_solution;
    }

    let lo_positive = npv_lo > 0.0 || (npv_lo == 0.0 && npv_hi < 0.0);
    let mut it = 0;
    while it < IRR_MAX_ITERATIONS {
        it += 1;
        let mid = (lo + hi) * 0.5;
        let value = npv(mid, cash_flows);
        if value.abs() < IRR_NPV_TOLERANCE {
            return IrrSolution {
                irr: Some(mid),
                iterations: it,
                converged: true,
            };
        }
        if (value > 0.0) == lo_positive {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    IrrSolution {
        irr: Some((lo + hi) * 0.5),
        iterations: it,
        converged: false,
    }
}

pub fn irr(cash_flows: &[f64]) -> Option<f64> {
    solve_irr(cash_flows).irr
}

/// Projects a one-off acquisition over its hold and solves its returns.
///
/// Pure: reads the neighborhood and product type, mutates nothing.
pub fn underwrite(
    deal: &Deal,
    neighborhood: &Neighborhood,
    product: &ProductType,
    inputs: DealInputs,
) -> UnderwriteResult {
    let inputs = inputs.clamped();
    let loan_amount = (deal.purchase_price * deal.debt.ltv).max(0.0);
    let equity_required = deal.purchase_price - loan_amount + inputs.capex;

    let mut balance = loan_amount;
    let mut years = Vec::with_capacity(inputs.hold_years as usize);
    for year in 1..=inputs.hold_years {
        let ramp = (year as f64 / LIFT_RAMP_YEARS).min(1.0);
        let base_noi = deal.in_place_noi * (1.0 + deal.market_noi_lift_pct * ramp);
        let rent_index = neighborhood.rent_index * (1.0 + inputs.rent_growth).powi(year as i32);
        let noi = compute_noi(
            base_noi,
            rent_index,
            neighborhood.vacancy,
            product.base_expense_ratio,
        );

        let ds = annual_debt_service(balance, deal.debt.rate, deal.debt.amort_years, false);
        balance = (balance - ds.principal).max(0.0);
        let capex = if year == 1 { inputs.capex } else { 0.0 };

        years.push(UnderwriteYear {
            year,
            base_noi,
            rent_index,
            noi,
            debt_service: ds.payment,
            principal: ds.principal,
            capex,
            cash_flow: noi - ds.payment - capex,
            loan_balance: balance,
        });
    }

    let exit_noi = years.last().map(|y| y.noi).unwrap_or(0.0);
    let exit_value = exit_noi / inputs.exit_cap;
    let sale_net = exit_value - balance;

    let mut flows = Vec::with_capacity(years.len() + 1);
    flows.push(-equity_required);
    flows.extend(years.iter().map(|y| y.cash_flow));
    if let Some(last) = flows.last_mut() {
        *last += sale_net;
    }

    let total_distributions = years.iter().map(|y| y.cash_flow).sum::<f64>() + sale_net;
    let equity_multiple = if equity_required > 0.0 {
        total_distributions / equity_required
    } else {
        0.0
    };

    let solution = solve_irr(&flows);
    let message = match (solution.irr, solution.converged) {
        (None, _) => "No IRR within search bounds; cash flows never change sign.".to_string(),
        (Some(_), true) => "IRR solved.".to_string(),
        (Some(_), false) => {
            "Reached max iterations before tolerance was met; returning best estimate."
                .to_string()
        }
    };

    UnderwriteResult {
        deal_id: deal.id.clone(),
        inputs,
        loan_amount,
        equity_required,
        years,
        exit_noi,
        exit_value,
        remaining_loan: balance,
        sale_net,
        total_distributions,
        equity_multiple,
        irr: solution.irr,
        irr_iterations: solution.iterations,
        message,
    }
}
