use serde::Serialize;

const CONCESSION_BASELINE_VACANCY: f64 = 0.05;
const CONCESSION_SLOPE: f64 = 0.4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtService {
    pub payment: f64,
    pub interest: f64,
    pub principal: f64,
}

pub fn effective_rent_factor(vacancy: f64) -> f64 {
    let excess = (vacancy - CONCESSION_BASELINE_VACANCY).max(0.0);
    (1.0 - excess * CONCESSION_SLOPE).clamp(0.92, 1.0)
}

/// Rescales an anchor NOI to current rent and vacancy conditions.
///
/// Gross income is backed out of `base_noi` through the expense ratio, moved by
/// the rent index, occupancy and concessions, and the expense ratio is then
/// re-applied. The result is floored at zero.
pub fn compute_noi(base_noi: f64, rent_index: f64, vacancy: f64, expense_ratio: f64) -> f64 {
    let expense_ratio = expense_ratio.clamp(0.0, 0.95);
    let egi = base_noi / (1.0 - expense_ratio);
    let gross = egi * rent_index * (1.0 - vacancy) * effective_rent_factor(vacancy);
    let noi = gross * (1.0 - expense_ratio);
    if noi.is_finite() { noi.max(0.0) } else { 0.0 }
}

pub fn value_from_noi(noi: f64, cap_rate: f64) -> f64 {
    if cap_rate > 0.0 { noi / cap_rate } else { 0.0 }
}

pub fn annual_debt_service(
    balance: f64,
    rate: f64,
    amort_years: u32,
    interest_only: bool,
) -> DebtService {
    if balance <= 0.0 {
        return DebtService::default();
    }

    let interest = balance * rate;
    if interest_only {
        return DebtService {
            payment: interest,
            interest,
            principal: 0.0,
        };
    }

    let n = amort_years.max(1) as f64;
    let payment = if rate.abs() <= 1e-12 {
        balance / n
    } else {
        balance * rate / (1.0 - (1.0 + rate).powf(-n))
    };
    DebtService {
        payment,
        interest,
        principal: (payment - interest).max(0.0),
    }
}

/// Coverage ratio; a debt-free asset reports `f64::INFINITY`.
pub fn dscr(noi: f64, debt_service: f64) -> f64 {
    if debt_service <= 0.0 {
        return f64::INFINITY;
    }
    noi / debt_service
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    #[test]
    fn rent_factor_is_flat_below_baseline_and_floored() {
        assert_close(effective_rent_factor(0.02), 1.0, 1e-12);
        assert_close(effective_rent_factor(0.05), 1.0, 1e-12);
        assert_close(effective_rent_factor(0.10), 0.98, 1e-12);
        assert_close(effective_rent_factor(0.35), 0.92, 1e-12);
    }

    #[test]
    fn noi_is_unchanged_at_neutral_conditions() {
        assert_close(compute_noi(1_000_000.0, 1.0, 0.0, 0.4), 1_000_000.0, 1e-6);
    }

    #[test]
    fn noi_scales_with_rent_and_occupancy() {
        let noi = compute_noi(600_000.0, 1.2, 0.05, 0.4);
        assert_close(noi, 600_000.0 * 1.2 * 0.95, 1e-6);
    }

    #[test]
    fn value_guards_non_positive_cap_rate() {
        assert_close(value_from_noi(500_000.0, 0.05), 10_000_000.0, 1e-6);
        assert_eq!(value_from_noi(500_000.0, 0.0), 0.0);
        assert_eq!(value_from_noi(500_000.0, -0.01), 0.0);
    }

    #[test]
    fn interest_only_pays_no_principal() {
        let ds = annual_debt_service(2_000_000.0, 0.06, 30, true);
        assert_close(ds.payment, 120_000.0, 1e-9);
        assert_close(ds.interest, 120_000.0, 1e-9);
        assert_eq!(ds.principal, 0.0);
    }

    #[test]
    fn zero_balance_has_zero_service() {
        assert_eq!(
            annual_debt_service(0.0, 0.06, 30, false),
            DebtService::default()
        );
        assert_eq!(
            annual_debt_service(-5.0, 0.06, 30, true),
            DebtService::default()
        );
    }

    #[test]
    fn amortizing_payment_retires_loan_over_term() {
        let mut balance = 1_000_000.0;
        let payment = annual_debt_service(balance, 0.05, 30, false).payment;
        for _ in 0..30 {
            let interest = balance * 0.05;
            balance -= payment - interest;
        }
        assert_close(balance, 0.0, 1e-4);
    }

    #[test]
    fn dscr_sentinels() {
        assert_eq!(dscr(100_000.0, 0.0), f64::INFINITY);
        assert_eq!(dscr(100_000.0, -1.0), f64::INFINITY);
        assert_eq!(dscr(0.0, 50_000.0), 0.0);
        assert_close(dscr(150_000.0, 100_000.0), 1.5, 1e-12);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(256))]

        #[test]
        fn prop_noi_never_negative_in_domain(
            base_noi in 0.0f64..50_000_000.0,
            rent_index in 0.6f64..1.8,
            vacancy in 0.0f64..0.95,
            expense_ratio in 0.0f64..0.9
        ) {
            let noi = compute_noi(base_noi, rent_index, vacancy, expense_ratio);
            prop_assert!(noi >= 0.0);
            prop_assert!(noi.is_finite());
        }
    }
}
