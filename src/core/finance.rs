use super::error::{PlanError, PlanResult};
use super::series::Series;
use super::types::{Calendar, Year};

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Level monthly payment for a loan of `present_value` over `term_months`.
pub fn pmt(present_value: f64, annual_rate: f64, term_months: u32) -> f64 {
    if term_months == 0 {
        return present_value;
    }
    let monthly = annual_rate / 12.0;
    if monthly == 0.0 {
        return present_value / term_months as f64;
    }
    monthly * present_value / (1.0 - (1.0 + monthly).powi(-(term_months as i32)))
}

pub fn ipmt(balance: f64, annual_rate: f64) -> f64 {
    balance * annual_rate / 12.0
}

pub fn ppmt(balance: f64, annual_rate: f64, payment: f64) -> f64 {
    payment - ipmt(balance, annual_rate)
}

/// Months needed to retire `present_value` with a fixed `payment`.
pub fn term_months_from_payment(present_value: f64, annual_rate: f64, payment: f64) -> PlanResult<u32> {
    if payment <= 0.0 {
        return Err(PlanError::InvalidLoan {
            id: String::new(),
            reason: "payment must be > 0".to_string(),
        });
    }
    let monthly = annual_rate / 12.0;
    if monthly == 0.0 {
        return Ok((present_value / payment).ceil().max(1.0) as u32);
    }
    let ratio = present_value / (payment / monthly);
    if ratio >= 1.0 {
        return Err(PlanError::InvalidLoan {
            id: String::new(),
            reason: format!("payment {payment:.2} does not cover monthly interest"),
        });
    }
    let months = (-(1.0 - ratio).ln() / (1.0 + monthly).ln()).floor() + 1.0;
    Ok(months as u32)
}

#[derive(Clone, Debug, PartialEq)]
pub struct PensionFormula {
    pub service_start_year: Year,
    pub vesting_years: u32,
    pub final_avg_years: u32,
    pub retirement_age: u32,
}

/// Accrued annual pension benefit for each calendar year, driven by `salary`.
pub fn pension_accrued(salary: &Series, calendar: &Calendar, formula: &PensionFormula) -> Series {
    let salary = salary.standardized(calendar);
    let final_avg = salary.trailing_mean(formula.final_avg_years as usize);
    let multiplier = 0.01 * (1.0 + 0.1 * (formula.retirement_age as f64 - 52.0));
    Series::from_pairs(calendar.years().map(|year| {
        let service = (year - formula.service_start_year + 1).max(0) as f64;
        let vested = if service >= formula.vesting_years as f64 { 1.0 } else { 0.0 };
        (year, (multiplier * service * final_avg.get(year) * vested).round())
    }))
}

/// Household economies of scale by number of children with nonzero cost.
pub fn child_multiplier(active_children: usize) -> f64 {
    match active_children {
        0 => 0.0,
        1 => 1.24,
        2 => 1.0,
        _ => 0.76,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn pmt_matches_known_mortgage_payment() {
        // 200k over 30 years at 6%.
        assert_approx(round_cents(pmt(200_000.0, 0.06, 360)), 1199.10);
    }

    #[test]
    fn pmt_without_interest_is_straight_line() {
        assert_approx(pmt(12_000.0, 0.0, 12), 1000.0);
    }

    #[test]
    fn term_from_payment_inverts_pmt() {
        let payment = pmt(50_000.0, 0.05, 60);
        let months = term_months_from_payment(50_000.0, 0.05, payment + 0.01).expect("covers interest");
        assert_eq!(months, 60);
    }

    #[test]
    fn term_from_payment_rejects_interest_only_shortfall() {
        let err = term_months_from_payment(100_000.0, 0.12, 900.0).expect_err("below interest");
        assert!(matches!(err, PlanError::InvalidLoan { .. }));
    }

    #[test]
    fn pension_waits_for_vesting() {
        let cal = Calendar::new(2025, 6);
        let salary = Series::constant(&cal, 100_000.0);
        let formula = PensionFormula {
            service_start_year: 2025,
            vesting_years: 5,
            final_avg_years: 3,
            retirement_age: 62,
        };
        let pension = pension_accrued(&salary, &cal, &formula);
        assert_approx(pension.get(2028), 0.0);
        // 0.01 * 2.0 * 5 years * 100k
        assert_approx(pension.get(2029), 10_000.0);
    }

    #[test]
    fn child_multiplier_steps_down_with_more_children() {
        assert_approx(child_multiplier(0), 0.0);
        assert_approx(child_multiplier(1), 1.24);
        assert_approx(child_multiplier(2), 1.0);
        assert_approx(child_multiplier(5), 0.76);
    }
}
