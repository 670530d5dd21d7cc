use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::entity::{
    EntityCore, FinancialEntity, Posting, ProjectionContext, SeriesAttr, remap_id,
};
use super::error::{PlanError, PlanResult};
use super::series::{Factor, Series};
use super::types::{Calendar, ObjectId, Owner, Year};

/// Sale lifecycle. Legal moves: `Never -> Sold`, `Sold -> Reversed`,
/// `Reversed -> Sold`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum SaleState {
    #[default]
    Never,
    Sold,
    Reversed,
}

impl From<SaleState> for i8 {
    fn from(state: SaleState) -> Self {
        match state {
            SaleState::Never => 0,
            SaleState::Sold => 1,
            SaleState::Reversed => -1,
        }
    }
}

impl TryFrom<i8> for SaleState {
    type Error = String;

    fn try_from(raw: i8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(SaleState::Never),
            1 => Ok(SaleState::Sold),
            -1 => Ok(SaleState::Reversed),
            other => Err(format!("sold must be 0, 1 or -1, got {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownPaymentSource {
    pub account: ObjectId,
    /// Fraction of the down payment drawn from this account.
    pub fraction: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(flatten)]
    pub core: EntityCore,
    #[serde(default)]
    pub tax_keyword: String,
    pub growth_rate: Factor,
    #[serde(default)]
    pub contribution: Series,
    #[serde(default)]
    pub secondary_contribution: Series,
    /// Manual deposits (positive) and withdrawals (negative).
    #[serde(default)]
    pub transaction: Series,
    #[serde(default)]
    pub gains: Series,
    #[serde(default)]
    pub interest: bool,
    #[serde(default)]
    pub sold: SaleState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sale_postings: Vec<Posting>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub down_payment_sources: Vec<DownPaymentSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_liability: Option<ObjectId>,
}

impl Asset {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ObjectId,
        person: Owner,
        category: &str,
        subcategory: &str,
        name: &str,
        tax_keyword: &str,
        calendar: &Calendar,
        value: f64,
        growth_rate: impl Into<Factor>,
        contribution: f64,
    ) -> Self {
        let mut core = EntityCore::new(id, person, category, subcategory, name, calendar);
        core.value = Series::constant(calendar, value);
        Self {
            core,
            tax_keyword: tax_keyword.to_string(),
            growth_rate: growth_rate.into(),
            contribution: Series::constant(calendar, contribution),
            secondary_contribution: Series::zeros(calendar),
            transaction: Series::zeros(calendar),
            gains: Series::zeros(calendar),
            interest: false,
            sold: SaleState::Never,
            sale_postings: Vec::new(),
            down_payment_sources: Vec::new(),
            linked_liability: None,
        }
    }

    pub fn with_span(mut self, start_year: Year, end_year: Year) -> Self {
        self.core.start_year = start_year;
        self.core.end_year = end_year;
        self
    }

    pub fn deposit(&mut self, amount: f64, year: Year) {
        self.transaction.add(year, amount);
    }

    pub fn withdrawal(&mut self, amount: f64, year: Year) {
        self.deposit(-amount, year);
    }

    pub fn transition(&mut self, next: SaleState, year: Year) -> PlanResult<()> {
        let legal = matches!(
            (self.sold, next),
            (SaleState::Never, SaleState::Sold)
                | (SaleState::Sold, SaleState::Reversed)
                | (SaleState::Reversed, SaleState::Sold)
        );
        if !legal {
            return Err(PlanError::SaleTransition {
                id: self.core.id,
                year,
                reason: format!("cannot move from {:?} to {:?}", self.sold, next),
            });
        }
        self.sold = next;
        Ok(())
    }

    /// `value(y) = value(y-1) * (1 + growth(y)) + contribution(y)
    /// + secondary_contribution(y) + transaction(y)` over the ownership window,
    /// seeded by the value in `start_year`. Stored values are truncated to
    /// whole units; the recurrence carries full precision.
    fn compound(&mut self, calendar: &Calendar) {
        let growth = self.growth_rate.conform(calendar);
        let start = self.core.start_year;
        let end = self.core.end_year;
        let mut previous = self.core.value.get(start);
        let mut grown = Series::zeros(calendar);
        for year in calendar.years() {
            if year < start || year > end {
                continue;
            }
            if year > start {
                previous = previous * (1.0 + growth.get(year))
                    + self.contribution.get(year)
                    + self.secondary_contribution.get(year)
                    + self.transaction.get(year);
            }
            grown.set(year, previous.trunc());
        }
        self.core.value = grown;
    }
}

impl FinancialEntity for Asset {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn standardize(&mut self, calendar: &Calendar) {
        self.core.standardize(calendar);
        self.contribution = self.contribution.standardized(calendar);
        self.secondary_contribution = self.secondary_contribution.standardized(calendar);
        self.transaction = self.transaction.standardized(calendar);
        self.gains = self.gains.standardized(calendar);
    }

    fn update(&mut self, ctx: &ProjectionContext) -> PlanResult<()> {
        if !self.core.paired_attr.targets_series(SeriesAttr::Value) {
            self.compound(&ctx.calendar);
        }
        let value = &self.core.value;
        self.gains = value.map_with_year(|year, current| {
            if year < ctx.calendar.last() {
                value.get(year + 1) - current
            } else {
                0.0
            }
        });
        Ok(())
    }

    fn read_series(&self, attr: SeriesAttr) -> Option<&Series> {
        match attr {
            SeriesAttr::Value => Some(&self.core.value),
            SeriesAttr::Contribution => Some(&self.contribution),
            SeriesAttr::SecondaryContribution => Some(&self.secondary_contribution),
            SeriesAttr::Transaction => Some(&self.transaction),
            SeriesAttr::Gains => Some(&self.gains),
            _ => None,
        }
    }

    fn write_series_slot(&mut self, attr: SeriesAttr) -> Option<&mut Series> {
        match attr {
            SeriesAttr::Value => Some(&mut self.core.value),
            SeriesAttr::Contribution => Some(&mut self.contribution),
            SeriesAttr::SecondaryContribution => Some(&mut self.secondary_contribution),
            _ => None,
        }
    }

    fn remap_ids(&mut self, map: &BTreeMap<ObjectId, ObjectId>) {
        self.core.remap_ids(map);
        for posting in &mut self.sale_postings {
            remap_id(&mut posting.account, map);
        }
        for source in &mut self.down_payment_sources {
            remap_id(&mut source.account, map);
        }
        if let Some(id) = self.linked_liability.as_mut() {
            remap_id(id, map);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ObjectKind, category};
    use proptest::prelude::{prop_assert, proptest};

    fn ctx(cal: Calendar) -> ProjectionContext {
        ProjectionContext {
            calendar: cal,
            infl_rate: Series::zeros(&cal),
            adults: vec![ObjectId::new(ObjectKind::Person, 1)],
        }
    }

    fn brokerage(cal: &Calendar, value: f64, growth: f64, contribution: f64) -> Asset {
        Asset::new(
            ObjectId::new(ObjectKind::Asset, 1),
            Owner::Person(ObjectId::new(ObjectKind::Person, 1)),
            category::INVESTMENT,
            "Brokerage",
            "Brokerage",
            "",
            cal,
            value,
            growth,
            contribution,
        )
    }

    #[test]
    fn compound_growth_adds_contribution_after_growth() {
        let cal = Calendar::new(2025, 3);
        let mut asset = brokerage(&cal, 10_000.0, 0.05, 1000.0);
        asset.update(&ctx(cal)).expect("update");
        assert_eq!(asset.core.value.get(2025), 10_000.0);
        assert_eq!(asset.core.value.get(2026), 11_500.0);
        assert_eq!(asset.gains.get(2025), 1_500.0);
        assert_eq!(asset.gains.get(2028), 0.0);
    }

    #[test]
    fn stored_values_truncate_but_growth_compounds_unrounded() {
        let cal = Calendar::new(2025, 2);
        let mut asset = brokerage(&cal, 100.0, 0.017, 0.0);
        asset.update(&ctx(cal)).expect("update");
        assert_eq!(asset.core.value.get(2026), 101.0);
        assert_eq!(asset.core.value.get(2027), 103.0);
    }

    #[test]
    fn value_is_zero_outside_ownership_window() {
        let cal = Calendar::new(2025, 5);
        let mut asset = brokerage(&cal, 5_000.0, 0.0, 0.0).with_span(2026, 2028);
        asset.deposit(1_000.0, 2027);
        asset.update(&ctx(cal)).expect("update");
        assert_eq!(asset.core.value.get(2025), 0.0);
        assert_eq!(asset.core.value.get(2026), 5_000.0);
        assert_eq!(asset.core.value.get(2027), 6_000.0);
        assert_eq!(asset.core.value.get(2029), 0.0);
    }

    #[test]
    fn sale_state_rejects_illegal_moves() {
        let cal = Calendar::new(2025, 1);
        let mut asset = brokerage(&cal, 1.0, 0.0, 0.0);
        assert!(asset.transition(SaleState::Reversed, 2025).is_err());
        asset.transition(SaleState::Sold, 2025).expect("never -> sold");
        asset.transition(SaleState::Reversed, 2025).expect("sold -> reversed");
        assert!(asset.transition(SaleState::Never, 2025).is_err());
        asset.transition(SaleState::Sold, 2026).expect("reversed -> sold");
    }

    #[test]
    fn sale_state_persists_as_signed_flag() {
        assert_eq!(serde_json::to_string(&SaleState::Reversed).expect("json"), "-1");
        let parsed: SaleState = serde_json::from_str("1").expect("flag");
        assert_eq!(parsed, SaleState::Sold);
        assert!(serde_json::from_str::<SaleState>("2").is_err());
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]
        #[test]
        fn prop_standardize_covers_calendar(n_years in 0u32..40, start_offset in 0i32..5) {
            let cal = Calendar::new(2025, n_years);
            let mut asset = brokerage(&Calendar::new(2025 + start_offset, 3), 100.0, 0.03, 10.0);
            asset.standardize(&cal);
            asset.update(&ctx(cal)).expect("update");
            prop_assert!(asset.core.value.years().eq(cal.years()));
            prop_assert!(asset.contribution.years().eq(cal.years()));
        }
    }
}
