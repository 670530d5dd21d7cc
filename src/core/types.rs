use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::PlanError;

pub type Year = i32;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Person,
    Income,
    Expense,
    Asset,
    Liability,
}

impl ObjectKind {
    pub const ENTITY_KINDS: [ObjectKind; 4] = [
        ObjectKind::Income,
        ObjectKind::Expense,
        ObjectKind::Asset,
        ObjectKind::Liability,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            ObjectKind::Person => "Person",
            ObjectKind::Income => "Income",
            ObjectKind::Expense => "Expense",
            ObjectKind::Asset => "Asset",
            ObjectKind::Liability => "Liability",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "Person" => Some(ObjectKind::Person),
            "Income" => Some(ObjectKind::Income),
            "Expense" => Some(ObjectKind::Expense),
            "Asset" => Some(ObjectKind::Asset),
            "Liability" | "Liab" => Some(ObjectKind::Liability),
            _ => None,
        }
    }
}

/// Type-prefixed identifier (`Income_3`). Sequence numbers are handed out by the
/// owning plan's [`IdAllocator`], never by global state.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ObjectId {
    pub kind: ObjectKind,
    pub seq: u32,
}

impl ObjectId {
    pub fn new(kind: ObjectKind, seq: u32) -> Self {
        Self { kind, seq }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind.prefix(), self.seq)
    }
}

impl FromStr for ObjectId {
    type Err = PlanError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (prefix, seq) = raw
            .rsplit_once('_')
            .ok_or_else(|| PlanError::Parse(format!("malformed object id `{raw}`")))?;
        let kind = ObjectKind::from_prefix(prefix)
            .ok_or_else(|| PlanError::Parse(format!("unknown object kind in `{raw}`")))?;
        let seq = seq
            .parse::<u32>()
            .map_err(|_| PlanError::Parse(format!("malformed sequence in `{raw}`")))?;
        Ok(Self { kind, seq })
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Who an entity belongs to: one person, or the household jointly.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Owner {
    Joint,
    Person(ObjectId),
}

impl Owner {
    pub fn person(self) -> Option<ObjectId> {
        match self {
            Owner::Joint => None,
            Owner::Person(id) => Some(id),
        }
    }

    pub fn is_joint(self) -> bool {
        matches!(self, Owner::Joint)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Joint => f.write_str("Joint"),
            Owner::Person(id) => id.fmt(f),
        }
    }
}

impl FromStr for Owner {
    type Err = PlanError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw == "Joint" {
            return Ok(Owner::Joint);
        }
        let id: ObjectId = raw.parse()?;
        if id.kind != ObjectKind::Person {
            return Err(PlanError::Parse(format!("owner `{raw}` is not a person")));
        }
        Ok(Owner::Person(id))
    }
}

impl Serialize for Owner {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Owner {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Consecutive years shared by every series in a plan.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(into = "Vec<Year>", try_from = "Vec<Year>")]
pub struct Calendar {
    first: Year,
    last: Year,
}

impl Calendar {
    /// `n_years + 1` years starting at `start_year`.
    pub fn new(start_year: Year, n_years: u32) -> Self {
        Self {
            first: start_year,
            last: start_year + n_years as Year,
        }
    }

    pub fn first(&self) -> Year {
        self.first
    }

    pub fn last(&self) -> Year {
        self.last
    }

    pub fn len(&self) -> usize {
        (self.last - self.first + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }

    pub fn contains(&self, year: Year) -> bool {
        (self.first..=self.last).contains(&year)
    }

    pub fn years(&self) -> impl Iterator<Item = Year> + use<> {
        self.first..=self.last
    }

    pub fn clamp(&self, year: Year) -> Year {
        year.clamp(self.first, self.last)
    }
}

impl From<Calendar> for Vec<Year> {
    fn from(calendar: Calendar) -> Self {
        calendar.years().collect()
    }
}

impl TryFrom<Vec<Year>> for Calendar {
    type Error = String;

    fn try_from(years: Vec<Year>) -> Result<Self, Self::Error> {
        let (Some(&first), Some(&last)) = (years.first(), years.last()) else {
            return Err("cal_year must contain at least one year".to_string());
        };
        if years.windows(2).any(|pair| pair[1] != pair[0] + 1) {
            return Err("cal_year must be consecutive years".to_string());
        }
        Ok(Self { first, last })
    }
}

/// Monotonic per-kind sequence counters owned by one plan.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IdAllocator {
    counters: BTreeMap<ObjectKind, u32>,
}

impl IdAllocator {
    pub fn next(&mut self, kind: ObjectKind) -> ObjectId {
        let counter = self.counters.entry(kind).or_insert(0);
        *counter += 1;
        ObjectId::new(kind, *counter)
    }

    /// Make sure the next id handed out for `id.kind` is above `id.seq`.
    pub fn observe(&mut self, id: ObjectId) {
        let counter = self.counters.entry(id.kind).or_insert(0);
        *counter = (*counter).max(id.seq);
    }

    pub fn reset(&mut self, kind: ObjectKind, value: u32) {
        self.counters.insert(kind, value);
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseSharePolicy {
    #[default]
    Even,
    Proportional,
}

pub mod category {
    pub const EARNED: &str = "Earned";
    pub const EXTERNAL: &str = "External";
    pub const NECESSARY: &str = "Necessary";
    pub const DISCRETIONARY: &str = "Discretionary";
    pub const SAVINGS: &str = "Savings";
    pub const TAX: &str = "Tax";
    pub const INVESTMENT: &str = "Investment";
    pub const TANGIBLE: &str = "Tangible";
    pub const INSTALLMENT: &str = "Installment";

    /// Expense categories that count against cash flow in allocation.
    pub const SPENDING: [&str; 3] = [NECESSARY, DISCRETIONARY, TAX];
}
