use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::entity::{EntityCore, FinancialEntity, ProjectionContext, SeriesAttr};
use super::error::PlanResult;
use super::finance::child_multiplier;
use super::flow::Flow;
use super::series::Series;
use super::types::{Calendar, ObjectId, Owner, Year};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    #[serde(flatten)]
    pub core: EntityCore,
    #[serde(flatten)]
    pub flow: Flow,
    #[serde(default)]
    pub tax_keyword: String,
    /// Per-child cost series for household child expenses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_components: Option<BTreeMap<ObjectId, Series>>,
    /// Fraction of a joint expense carried by the designated adult.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_props: Option<Series>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interest_payment: Option<Series>,
}

impl Expense {
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
        fixed: bool,
    ) -> Self {
        let mut core = EntityCore::new(id, person, category, subcategory, name, calendar);
        core.value = Series::constant(calendar, value);
        Self {
            core,
            flow: Flow::new(fixed, Series::constant(calendar, value)),
            tax_keyword: tax_keyword.to_string(),
            child_components: None,
            share_props: None,
            interest_payment: None,
        }
    }

    pub fn with_span(mut self, start_year: Year, end_year: Year) -> Self {
        self.core.start_year = start_year;
        self.core.end_year = end_year;
        self
    }

    /// Fixed expense whose value is given year by year.
    pub fn with_series(mut self, value: Series) -> Self {
        self.core.value = value.clone();
        self.flow.value_input = value;
        self
    }

    /// Rebuild the base input from the per-child series, scaled by the
    /// household multiplier for the number of children costing money that year.
    pub fn recompute_child_input(&mut self, calendar: &Calendar) {
        let Some(children) = &self.child_components else {
            return;
        };
        let conformed: Vec<Series> = children.values().map(|s| s.standardized(calendar)).collect();
        self.flow.value_input = Series::from_pairs(calendar.years().map(|year| {
            let active = conformed.iter().filter(|s| s.get(year) > 0.0).count();
            let total: f64 = conformed.iter().map(|s| s.get(year)).sum();
            (year, total * child_multiplier(active))
        }));
    }

    /// Joint expenses: designated adult takes `share_props`, the others split
    /// the complement. Individual expenses belong wholly to their owner.
    fn split_components(&mut self, adults: &[ObjectId]) {
        let value = &self.core.value;
        self.core.components = match (self.core.person, &self.share_props) {
            (Owner::Person(person), _) => BTreeMap::from([(person, value.truncated())]),
            (Owner::Joint, None) => return,
            (Owner::Joint, Some(_)) if adults.is_empty() => BTreeMap::new(),
            (Owner::Joint, Some(_)) if adults.len() == 1 => {
                BTreeMap::from([(adults[0], value.truncated())])
            }
            (Owner::Joint, Some(share)) => {
                let others = (adults.len() - 1) as f64;
                adults
                    .iter()
                    .enumerate()
                    .map(|(idx, adult)| {
                        let part = if idx == 0 {
                            value.times(share)
                        } else {
                            value.zip_with(share, |v, s| v * (1.0 - s) / others)
                        };
                        (*adult, part.truncated())
                    })
                    .collect()
            }
        };
    }

    pub fn deflated(&self, ctx: &ProjectionContext) -> Series {
        self.flow
            .deflate(&self.core.value, self.core.start_year, &ctx.infl_rate, &ctx.calendar)
    }
}

impl FinancialEntity for Expense {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn standardize(&mut self, calendar: &Calendar) {
        self.core.standardize(calendar);
        self.flow.standardize(calendar);
        if let Some(children) = self.child_components.as_mut() {
            for series in children.values_mut() {
                *series = series.standardized(calendar);
            }
        }
        if let Some(share) = self.share_props.as_mut() {
            *share = share.standardized(calendar);
        }
        if let Some(interest) = self.interest_payment.as_mut() {
            *interest = interest.standardized(calendar);
        }
    }

    fn update(&mut self, ctx: &ProjectionContext) -> PlanResult<()> {
        self.core.value = self.flow.inflate(
            &self.core.value,
            self.core.start_year,
            self.core.end_year,
            &ctx.infl_rate,
            &ctx.calendar,
        );
        self.split_components(&ctx.adults);
        Ok(())
    }

    fn read_series(&self, attr: SeriesAttr) -> Option<&Series> {
        match attr {
            SeriesAttr::Value => Some(&self.core.value),
            SeriesAttr::ValueInput => Some(&self.flow.value_input),
            SeriesAttr::InterestPayment => self.interest_payment.as_ref(),
            _ => None,
        }
    }

    fn write_series_slot(&mut self, attr: SeriesAttr) -> Option<&mut Series> {
        match attr {
            SeriesAttr::Value => Some(&mut self.core.value),
            SeriesAttr::ValueInput => Some(&mut self.flow.value_input),
            SeriesAttr::InterestPayment => Some(self.interest_payment.get_or_insert_with(Series::default)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ObjectKind, category};

    fn person(seq: u32) -> ObjectId {
        ObjectId::new(ObjectKind::Person, seq)
    }

    fn ctx(cal: Calendar, adults: Vec<ObjectId>) -> ProjectionContext {
        ProjectionContext {
            calendar: cal,
            infl_rate: Series::zeros(&cal),
            adults,
        }
    }

    fn joint_rent(cal: &Calendar) -> Expense {
        Expense::new(
            ObjectId::new(ObjectKind::Expense, 1),
            Owner::Joint,
            category::NECESSARY,
            "Housing",
            "Rent",
            "",
            cal,
            2000.0,
            false,
        )
    }

    #[test]
    fn designated_adult_takes_share_of_joint_expense() {
        let cal = Calendar::new(2025, 1);
        let mut rent = joint_rent(&cal);
        rent.share_props = Some(Series::constant(&cal, 0.75));
        rent.update(&ctx(cal, vec![person(1), person(2)])).expect("update");
        assert_eq!(rent.core.components[&person(1)].get(2025), 1500.0);
        assert_eq!(rent.core.components[&person(2)].get(2025), 500.0);
    }

    #[test]
    fn components_track_current_adults_only() {
        let cal = Calendar::new(2025, 1);
        let mut rent = joint_rent(&cal);
        rent.share_props = Some(Series::constant(&cal, 0.5));
        rent.core.components.insert(person(9), Series::constant(&cal, 1.0));
        rent.update(&ctx(cal, vec![person(1), person(2)])).expect("update");
        assert_eq!(
            rent.core.components.keys().copied().collect::<Vec<_>>(),
            vec![person(1), person(2)]
        );
    }

    #[test]
    fn child_input_applies_household_multiplier() {
        let cal = Calendar::new(2025, 2);
        let mut care = joint_rent(&cal);
        care.child_components = Some(BTreeMap::from([
            (person(3), Series::from_pairs([(2025, 1000.0), (2026, 1000.0)])),
            (person(4), Series::from_pairs([(2026, 1000.0)])),
        ]));
        care.recompute_child_input(&cal);
        let input = &care.flow.value_input;
        assert!((input.get(2025) - 1240.0).abs() < 1e-9);
        assert!((input.get(2026) - 2000.0).abs() < 1e-9);
        assert_eq!(input.get(2027), 0.0);
    }
}
