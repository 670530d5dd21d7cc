use serde::{Deserialize, Serialize};

use super::series::{Factor, Series, cumulative_inflation};
use super::types::{Calendar, Year};

/// Inflation inputs shared by incomes and expenses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub fixed: bool,
    /// Base amount in start-year money. Ignored when `fixed`.
    #[serde(default)]
    pub value_input: Series,
    /// Overrides the plan inflation series when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infl_rate: Option<Factor>,
}

impl Flow {
    pub fn new(fixed: bool, value_input: Series) -> Self {
        Self {
            fixed,
            value_input,
            infl_rate: None,
        }
    }

    pub fn standardize(&mut self, calendar: &Calendar) {
        self.value_input = self.value_input.standardized(calendar);
    }

    fn factor(&self, start_year: Year, plan_rate: &Series, calendar: &Calendar) -> Series {
        let rate = match &self.infl_rate {
            Some(rate) => rate.conform(calendar),
            None => plan_rate.clone(),
        };
        cumulative_inflation(&rate, start_year, calendar)
    }

    /// The canonical value series: inflated input (or the fixed value) clamped
    /// to `[start_year, end_year]`.
    pub fn inflate(
        &self,
        current: &Series,
        start_year: Year,
        end_year: Year,
        plan_rate: &Series,
        calendar: &Calendar,
    ) -> Series {
        let base = if self.fixed {
            current.standardized(calendar)
        } else {
            let factor = self.factor(start_year, plan_rate, calendar);
            self.value_input
                .standardized(calendar)
                .times(&factor)
                .rounded()
        };
        base.window(start_year, end_year)
    }

    /// Exact inverse of [`Flow::inflate`] for display round trips.
    pub fn deflate(
        &self,
        value: &Series,
        start_year: Year,
        plan_rate: &Series,
        calendar: &Calendar,
    ) -> Series {
        if self.fixed {
            return value.clone();
        }
        let factor = self.factor(start_year, plan_rate, calendar);
        value.zip_with(&factor, |v, f| if f == 0.0 { 0.0 } else { v / f })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    #[test]
    fn fixed_flow_keeps_value_inside_window() {
        let cal = Calendar::new(2025, 4);
        let flow = Flow::new(true, Series::default());
        let current = Series::constant(&cal, 300.0);
        let out = flow.inflate(&current, 2026, 2027, &Series::constant(&cal, 0.5), &cal);
        assert_eq!(out.get(2025), 0.0);
        assert_eq!(out.get(2026), 300.0);
        assert_eq!(out.get(2027), 300.0);
        assert_eq!(out.get(2028), 0.0);
    }

    #[test]
    fn inflation_starts_compounding_after_start_year() {
        let cal = Calendar::new(2025, 3);
        let flow = Flow::new(false, Series::constant(&cal, 1000.0));
        let out = flow.inflate(&Series::default(), 2026, 2028, &Series::constant(&cal, 0.1), &cal);
        assert_eq!(out.get(2025), 0.0);
        assert_eq!(out.get(2026), 1000.0);
        assert_eq!(out.get(2027), 1100.0);
        assert_eq!(out.get(2028), 1210.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(48))]
        #[test]
        fn prop_deflate_inverts_inflate(
            base in 0u32..500_000,
            rate in 0.0f64..0.12,
            start_offset in 0i32..10,
            n_years in 0u32..40
        ) {
            let cal = Calendar::new(2025, n_years);
            let start = cal.clamp(2025 + start_offset);
            let flow = Flow::new(false, Series::constant(&cal, base as f64));
            let plan_rate = Series::constant(&cal, rate);
            let inflated = flow.inflate(&Series::default(), start, cal.last(), &plan_rate, &cal);
            let restored = flow.deflate(&inflated, start, &plan_rate, &cal);
            for year in start..=cal.last() {
                prop_assert!((restored.get(year) - base as f64).abs() <= 1.0);
            }
        }
    }
}
