use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::{PlanError, PlanResult};
use super::series::{Factor, Series};
use super::types::{Calendar, ObjectId, ObjectKind, Owner, Year};

/// Series-valued attributes that can take part in a `series` link.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesAttr {
    Value,
    ValueInput,
    Pension,
    InterestPayment,
    Contribution,
    SecondaryContribution,
    Transaction,
    Gains,
    AssetValue,
    PaymentAnnual,
    InterestPaymentAnnual,
    PrincipalPaymentAnnual,
    ExtraPaymentAnnual,
    TotalPaymentAnnual,
    PmiAnnual,
}

impl SeriesAttr {
    pub fn readable_on(self, kind: ObjectKind) -> bool {
        use SeriesAttr::*;
        match kind {
            ObjectKind::Income => matches!(self, Value | ValueInput | Pension),
            ObjectKind::Expense => matches!(self, Value | ValueInput | InterestPayment),
            ObjectKind::Asset => matches!(
                self,
                Value | Contribution | SecondaryContribution | Transaction | Gains
            ),
            ObjectKind::Liability => matches!(
                self,
                Value
                    | AssetValue
                    | PaymentAnnual
                    | InterestPaymentAnnual
                    | PrincipalPaymentAnnual
                    | ExtraPaymentAnnual
                    | TotalPaymentAnnual
                    | PmiAnnual
            ),
            ObjectKind::Person => false,
        }
    }

    pub fn writable_on(self, kind: ObjectKind) -> bool {
        use SeriesAttr::*;
        match kind {
            ObjectKind::Income => matches!(self, Value | ValueInput),
            ObjectKind::Expense => matches!(self, Value | ValueInput | InterestPayment),
            ObjectKind::Asset => matches!(self, Value | Contribution | SecondaryContribution),
            ObjectKind::Liability => matches!(self, AssetValue),
            ObjectKind::Person => false,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeAttr {
    StartYear,
    EndYear,
}

/// `target = proportion * parent.source`, optionally capped by an
/// inflation-escalated ceiling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesLink {
    pub source: SeriesAttr,
    pub target: SeriesAttr,
    pub proportion: Factor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap: Option<Factor>,
}

impl SeriesLink {
    pub fn new(source: SeriesAttr, target: SeriesAttr, proportion: impl Into<Factor>) -> Self {
        Self {
            source,
            target,
            proportion: proportion.into(),
            cap: None,
        }
    }

    pub fn with_cap(mut self, cap: impl Into<Factor>) -> Self {
        self.cap = Some(cap.into());
        self
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimeLink {
    pub source: TimeAttr,
    pub target: TimeAttr,
    pub offset: i32,
}

impl TimeLink {
    pub fn new(source: TimeAttr, target: TimeAttr, offset: i32) -> Self {
        Self {
            source,
            target,
            offset,
        }
    }

    /// Start and end both follow the parent.
    pub fn span() -> [TimeLink; 2] {
        [
            TimeLink::new(TimeAttr::StartYear, TimeAttr::StartYear, 0),
            TimeLink::new(TimeAttr::EndYear, TimeAttr::EndYear, 0),
        ]
    }
}

/// A joint expense reads its splitting proportion from an adult's income.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ShareLink {
    pub source: SeriesAttr,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Series,
    Time,
    Share,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Series, Namespace::Time, Namespace::Share];
}

/// Incoming links on a child, keyed by parent id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PairedAttributes {
    #[serde(default)]
    pub series: BTreeMap<ObjectId, Vec<SeriesLink>>,
    #[serde(default)]
    pub time: BTreeMap<ObjectId, Vec<TimeLink>>,
    #[serde(default)]
    pub share: BTreeMap<ObjectId, Vec<ShareLink>>,
}

impl PairedAttributes {
    pub fn has_parent(&self, namespace: Namespace, parent: ObjectId) -> bool {
        match namespace {
            Namespace::Series => self.series.contains_key(&parent),
            Namespace::Time => self.time.contains_key(&parent),
            Namespace::Share => self.share.contains_key(&parent),
        }
    }

    pub fn parents(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.series
            .keys()
            .chain(self.time.keys())
            .chain(self.share.keys())
            .copied()
    }

    /// Drop every link from `parent`; returns the namespaces that had one.
    pub fn sever(&mut self, parent: ObjectId) -> Vec<Namespace> {
        let mut severed = Vec::new();
        if self.series.remove(&parent).is_some() {
            severed.push(Namespace::Series);
        }
        if self.time.remove(&parent).is_some() {
            severed.push(Namespace::Time);
        }
        if self.share.remove(&parent).is_some() {
            severed.push(Namespace::Share);
        }
        severed
    }

    pub fn targets_series(&self, attr: SeriesAttr) -> bool {
        self.series
            .values()
            .flatten()
            .any(|link| link.target == attr)
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty() && self.time.is_empty() && self.share.is_empty()
    }

    fn remap(&mut self, map: &BTreeMap<ObjectId, ObjectId>) {
        self.series = remap_keys(std::mem::take(&mut self.series), map);
        self.time = remap_keys(std::mem::take(&mut self.time), map);
        self.share = remap_keys(std::mem::take(&mut self.share), map);
    }
}

pub(crate) fn remap_keys<V>(
    entries: BTreeMap<ObjectId, V>,
    map: &BTreeMap<ObjectId, ObjectId>,
) -> BTreeMap<ObjectId, V> {
    entries
        .into_iter()
        .map(|(id, value)| (map.get(&id).copied().unwrap_or(id), value))
        .collect()
}

pub(crate) fn remap_id(id: &mut ObjectId, map: &BTreeMap<ObjectId, ObjectId>) {
    if let Some(new_id) = map.get(id) {
        *id = *new_id;
    }
}

pub type Edge = (ObjectId, ObjectId);

/// Plan-level mirror of every link as `(parent, child)` pairs per namespace.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeRegistry {
    #[serde(default)]
    pub series: Vec<Edge>,
    #[serde(default)]
    pub time: Vec<Edge>,
    #[serde(default)]
    pub share: Vec<Edge>,
}

impl EdgeRegistry {
    pub fn edges(&self, namespace: Namespace) -> &[Edge] {
        match namespace {
            Namespace::Series => &self.series,
            Namespace::Time => &self.time,
            Namespace::Share => &self.share,
        }
    }

    fn edges_mut(&mut self, namespace: Namespace) -> &mut Vec<Edge> {
        match namespace {
            Namespace::Series => &mut self.series,
            Namespace::Time => &mut self.time,
            Namespace::Share => &mut self.share,
        }
    }

    pub fn insert(&mut self, namespace: Namespace, parent: ObjectId, child: ObjectId) {
        let edges = self.edges_mut(namespace);
        if !edges.contains(&(parent, child)) {
            edges.push((parent, child));
        }
    }

    pub fn remove_pair(&mut self, parent: ObjectId, child: ObjectId) {
        for namespace in Namespace::ALL {
            self.edges_mut(namespace)
                .retain(|edge| *edge != (parent, child));
        }
    }

    pub fn remove_touching(&mut self, id: ObjectId) {
        for namespace in Namespace::ALL {
            self.edges_mut(namespace)
                .retain(|(parent, child)| *parent != id && *child != id);
        }
    }

    pub fn all(&self) -> impl Iterator<Item = (Namespace, Edge)> + '_ {
        Namespace::ALL.into_iter().flat_map(move |namespace| {
            self.edges(namespace)
                .iter()
                .map(move |edge| (namespace, *edge))
        })
    }

    /// Distinct children of `parent` across all namespaces, in registry order.
    pub fn children_of(&self, parent: ObjectId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        for (_, (from, to)) in self.all() {
            if from == parent && !out.contains(&to) {
                out.push(to);
            }
        }
        out
    }

    pub fn parents_of(&self, child: ObjectId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        for (_, (from, to)) in self.all() {
            if to == child && !out.contains(&from) {
                out.push(from);
            }
        }
        out
    }

    pub fn has_children(&self, parent: ObjectId) -> bool {
        self.all().any(|(_, (from, _))| from == parent)
    }

    pub fn remap(&mut self, map: &BTreeMap<ObjectId, ObjectId>) {
        for namespace in Namespace::ALL {
            for (parent, child) in self.edges_mut(namespace).iter_mut() {
                remap_id(parent, map);
                remap_id(child, map);
            }
        }
    }
}

/// Which series a drawdown or sale posting lands on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ledger {
    Transaction,
    Contribution,
    Charges,
}

/// One ledger change made on another account, kept so it can be undone exactly.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub account: ObjectId,
    pub year: Year,
    pub amount: f64,
    pub ledger: Ledger,
}

/// State shared by every income, expense, asset and liability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityCore {
    pub id: ObjectId,
    pub person: Owner,
    pub category: String,
    pub subcategory: String,
    pub name: String,
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub future_event: bool,
    #[serde(default)]
    pub ui_hidden: bool,
    pub start_year: Year,
    pub end_year: Year,
    pub value: Series,
    #[serde(default)]
    pub components: BTreeMap<ObjectId, Series>,
    #[serde(default)]
    pub paired_attr: PairedAttributes,
    #[serde(default)]
    pub dependent_objs: bool,
}

impl EntityCore {
    pub fn new(
        id: ObjectId,
        person: Owner,
        category: &str,
        subcategory: &str,
        name: &str,
        calendar: &Calendar,
    ) -> Self {
        Self {
            id,
            person,
            category: category.to_string(),
            subcategory: subcategory.to_string(),
            name: name.to_string(),
            editable: true,
            future_event: false,
            ui_hidden: false,
            start_year: calendar.first(),
            end_year: calendar.last(),
            value: Series::zeros(calendar),
            components: BTreeMap::new(),
            paired_attr: PairedAttributes::default(),
            dependent_objs: false,
        }
    }

    pub fn standardize(&mut self, calendar: &Calendar) {
        self.value = self.value.standardized(calendar);
        for series in self.components.values_mut() {
            *series = series.standardized(calendar);
        }
    }

    pub fn remap_ids(&mut self, map: &BTreeMap<ObjectId, ObjectId>) {
        remap_id(&mut self.id, map);
        self.paired_attr.remap(map);
    }
}

/// Plan-wide inputs an entity needs while it recomputes itself.
#[derive(Clone, Debug)]
pub struct ProjectionContext {
    pub calendar: Calendar,
    pub infl_rate: Series,
    /// Non-dependent people in plan order; the first is the designated adult.
    pub adults: Vec<ObjectId>,
}

pub trait FinancialEntity {
    fn core(&self) -> &EntityCore;
    fn core_mut(&mut self) -> &mut EntityCore;

    /// Re-index every series onto `calendar`.
    fn standardize(&mut self, calendar: &Calendar);

    /// Recompute derived series from raw inputs.
    fn update(&mut self, ctx: &ProjectionContext) -> PlanResult<()>;

    fn read_series(&self, attr: SeriesAttr) -> Option<&Series>;

    fn write_series_slot(&mut self, attr: SeriesAttr) -> Option<&mut Series>;

    /// Rewrite every id this entity refers to.
    fn remap_ids(&mut self, map: &BTreeMap<ObjectId, ObjectId>) {
        self.core_mut().remap_ids(map);
    }

    fn id(&self) -> ObjectId {
        self.core().id
    }

    fn write_series(&mut self, attr: SeriesAttr, series: Series) -> PlanResult<()> {
        let id = self.id();
        match self.write_series_slot(attr) {
            Some(slot) => {
                *slot = series;
                Ok(())
            }
            None => Err(PlanError::InvalidLink {
                parent: id,
                child: id,
                reason: format!("{attr:?} is not writable on {}", id.kind.prefix()),
            }),
        }
    }

    fn time(&self, attr: TimeAttr) -> Year {
        match attr {
            TimeAttr::StartYear => self.core().start_year,
            TimeAttr::EndYear => self.core().end_year,
        }
    }

    fn set_time(&mut self, attr: TimeAttr, year: Year) {
        match attr {
            TimeAttr::StartYear => self.core_mut().start_year = year,
            TimeAttr::EndYear => self.core_mut().end_year = year,
        }
    }
}

/// Split a value evenly over the adults for joint ownership, otherwise give it
/// all to the owner. Amounts are truncated to whole units.
pub fn owner_components(value: &Series, owner: Owner, adults: &[ObjectId]) -> BTreeMap<ObjectId, Series> {
    match owner {
        Owner::Person(person) => BTreeMap::from([(person, value.truncated())]),
        Owner::Joint if adults.is_empty() => BTreeMap::new(),
        Owner::Joint => {
            let share = 1.0 / adults.len() as f64;
            adults
                .iter()
                .map(|adult| (*adult, value.scale(share).truncated()))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(kind: ObjectKind, seq: u32) -> ObjectId {
        ObjectId::new(kind, seq)
    }

    #[test]
    fn liability_accepts_only_asset_value_as_target() {
        assert!(SeriesAttr::AssetValue.writable_on(ObjectKind::Liability));
        assert!(!SeriesAttr::Value.writable_on(ObjectKind::Liability));
        assert!(SeriesAttr::PaymentAnnual.readable_on(ObjectKind::Liability));
        assert!(!SeriesAttr::PaymentAnnual.readable_on(ObjectKind::Asset));
    }

    #[test]
    fn registry_deduplicates_and_lists_children_once() {
        let a = id(ObjectKind::Asset, 1);
        let e = id(ObjectKind::Expense, 1);
        let mut edges = EdgeRegistry::default();
        edges.insert(Namespace::Series, a, e);
        edges.insert(Namespace::Series, a, e);
        edges.insert(Namespace::Time, a, e);
        assert_eq!(edges.series.len(), 1);
        assert_eq!(edges.children_of(a), vec![e]);
        edges.remove_touching(e);
        assert!(!edges.has_children(a));
    }

    #[test]
    fn sever_reports_namespaces_it_cleared() {
        let parent = id(ObjectKind::Income, 1);
        let mut paired = PairedAttributes::default();
        paired
            .series
            .insert(parent, vec![SeriesLink::new(SeriesAttr::Value, SeriesAttr::Value, 1.0)]);
        paired.time.insert(parent, TimeLink::span().to_vec());
        assert_eq!(paired.sever(parent), vec![Namespace::Series, Namespace::Time]);
        assert!(paired.is_empty());
    }

    #[test]
    fn joint_components_split_evenly_and_truncate() {
        let cal = Calendar::new(2025, 0);
        let adults = [id(ObjectKind::Person, 1), id(ObjectKind::Person, 2)];
        let split = owner_components(&Series::constant(&cal, 1001.0), Owner::Joint, &adults);
        assert_eq!(split.len(), 2);
        assert_eq!(split[&adults[0]].get(2025), 500.0);
    }
}
