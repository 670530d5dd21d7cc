use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::series::Series;
use super::types::{Calendar, ObjectId, Year};

/// Per-age child costs by expense column; index `i` is age `i`.
pub type ChildCostTable = BTreeMap<String, Vec<f64>>;

/// Column that is split into Childcare (ages 0-5) and Education (6-17).
pub const CHILDCARE_AND_EDUCATION: &str = "Childcare and Education";
pub const EDUCATION_START_AGE: u32 = 6;
pub const ADULT_AGE: u32 = 18;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: ObjectId,
    pub name: String,
    pub birth_year: Year,
    pub dependent: bool,
    #[serde(default)]
    pub age: Series,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_costs: Option<ChildCostTable>,
}

impl Person {
    pub fn new(id: ObjectId, name: &str, birth_year: Year, dependent: bool, calendar: &Calendar) -> Self {
        let mut person = Self {
            id,
            name: name.to_string(),
            birth_year,
            dependent,
            age: Series::default(),
            child_costs: None,
        };
        person.standardize(calendar);
        person
    }

    pub fn standardize(&mut self, calendar: &Calendar) {
        self.age = Series::from_pairs(
            calendar
                .years()
                .map(|year| (year, (year - self.birth_year) as f64)),
        );
    }

    /// Cost series for ages in `[from_age, to_age)`, indexed by calendar year.
    pub fn cost_by_year(&self, costs: &[f64], from_age: u32, to_age: u32) -> Series {
        Series::from_pairs((from_age..to_age).filter_map(|age| {
            costs
                .get(age as usize)
                .map(|cost| (self.birth_year + age as Year, *cost))
        }))
    }
}
