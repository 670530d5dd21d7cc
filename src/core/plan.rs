use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::asset::{Asset, DownPaymentSource};
use super::entity::{
    EdgeRegistry, FinancialEntity, Namespace, ProjectionContext, SeriesLink, ShareLink, TimeLink,
    remap_id,
};
use super::error::{PlanError, PlanResult};
use super::expense::Expense;
use super::income::Income;
use super::liability::Liability;
use super::person::Person;
use super::series::{Factor, Series};
use super::types::{
    Calendar, ExpenseSharePolicy, IdAllocator, ObjectId, ObjectKind, Owner, Year, category,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Object {
        id: ObjectId,
    },
    Purchase {
        asset: ObjectId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        liability: Option<ObjectId>,
        #[serde(default)]
        sources: Vec<DownPaymentSource>,
    },
    Marriage,
    Combination {
        names: Vec<String>,
    },
}

/// A scheduled future action, e.g. a purchase, a birth or a marriage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanEvent {
    pub year: Year,
    pub label: String,
    pub payload: EventPayload,
}

/// Any of the four projected entity variants, used when handing a new entity
/// to the plan.
#[derive(Clone, Debug)]
pub enum Entity {
    Income(Income),
    Expense(Expense),
    Asset(Asset),
    Liability(Liability),
}

impl Entity {
    pub fn id(&self) -> ObjectId {
        match self {
            Entity::Income(entity) => entity.core.id,
            Entity::Expense(entity) => entity.core.id,
            Entity::Asset(entity) => entity.core.id,
            Entity::Liability(entity) => entity.core.id,
        }
    }
}

impl From<Income> for Entity {
    fn from(entity: Income) -> Self {
        Entity::Income(entity)
    }
}

impl From<Expense> for Entity {
    fn from(entity: Expense) -> Self {
        Entity::Expense(entity)
    }
}

impl From<Asset> for Entity {
    fn from(entity: Asset) -> Self {
        Entity::Asset(entity)
    }
}

impl From<Liability> for Entity {
    fn from(entity: Liability) -> Self {
        Entity::Liability(entity)
    }
}

fn default_plan_id() -> String {
    "Plan_1".to_string()
}

/// A household plan: the calendar, the people, every projected entity and the
/// links between them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default = "default_plan_id")]
    pub id: String,
    pub name: String,
    pub start_year: Year,
    pub n_years: u32,
    #[serde(rename = "cal_year")]
    pub calendar: Calendar,
    pub infl_rate: Series,
    pub col_rate: f64,
    #[serde(default)]
    pub expense_share: ExpenseSharePolicy,
    /// 1 in years the household files as married, 0 otherwise.
    #[serde(default)]
    pub married: Series,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marriage_year: Option<Year>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combine_year: Option<Year>,
    pub people: Vec<Person>,
    pub income: Vec<Income>,
    pub expenses: Vec<Expense>,
    pub assets: Vec<Asset>,
    pub liabilities: Vec<Liability>,
    pub pairs: EdgeRegistry,
    pub drawdown_order: BTreeMap<ObjectId, Vec<ObjectId>>,
    pub events: Vec<PlanEvent>,
    #[serde(skip)]
    pub(crate) ids: IdAllocator,
    #[serde(skip)]
    pub(crate) in_cascade: bool,
}

macro_rules! find_in {
    ($list:expr, $id:expr) => {
        $list.iter().find(|entity| entity.core.id == $id)
    };
}

macro_rules! find_in_mut {
    ($list:expr, $id:expr) => {
        $list.iter_mut().find(|entity| entity.core.id == $id)
    };
}

impl Plan {
    pub fn new(
        name: &str,
        start_year: Year,
        n_years: u32,
        infl_rate: impl Into<Factor>,
        col_rate: f64,
    ) -> Self {
        let calendar = Calendar::new(start_year, n_years);
        Self {
            id: default_plan_id(),
            name: name.to_string(),
            start_year,
            n_years,
            calendar,
            infl_rate: infl_rate.into().conform(&calendar),
            col_rate,
            expense_share: ExpenseSharePolicy::Even,
            married: Series::zeros(&calendar),
            marriage_year: None,
            combine_year: None,
            people: Vec::new(),
            income: Vec::new(),
            expenses: Vec::new(),
            assets: Vec::new(),
            liabilities: Vec::new(),
            pairs: EdgeRegistry::default(),
            drawdown_order: BTreeMap::new(),
            events: Vec::new(),
            ids: IdAllocator::default(),
            in_cascade: false,
        }
    }

    pub fn next_id(&mut self, kind: ObjectKind) -> ObjectId {
        self.ids.next(kind)
    }

    /// Make the allocator hand out ids above every id already in the plan.
    pub(crate) fn rebuild_ids(&mut self) {
        let mut ids = IdAllocator::default();
        for person in &self.people {
            ids.observe(person.id);
        }
        for id in self.entity_ids() {
            ids.observe(id);
        }
        self.ids = ids;
    }

    /// Add a person. A new adult changes how joint entities split, so every
    /// joint entity is re-projected.
    pub fn add_person(&mut self, name: &str, birth_year: Year, dependent: bool) -> PlanResult<ObjectId> {
        let id = self.next_id(ObjectKind::Person);
        self.people
            .push(Person::new(id, name, birth_year, dependent, &self.calendar));
        if !dependent {
            self.drawdown_order.entry(id).or_default();
            self.project_joint()?;
        }
        Ok(id)
    }

    fn joint_ids(&self) -> Vec<ObjectId> {
        self.entities()
            .filter(|entity| entity.core().person.is_joint())
            .map(|entity| entity.id())
            .collect()
    }

    fn project_joint(&mut self) -> PlanResult<()> {
        for id in self.joint_ids() {
            if self.entity(id).is_some() {
                self.project(id)?;
            }
        }
        Ok(())
    }

    pub fn set_drawdown_order(&mut self, person: ObjectId, accounts: Vec<ObjectId>) {
        self.drawdown_order.insert(person, accounts);
    }

    /// Move the plan onto a new calendar and re-index everything on it.
    pub fn set_calendar(&mut self, start_year: Year, n_years: u32) {
        self.start_year = start_year;
        self.n_years = n_years;
        self.calendar = Calendar::new(start_year, n_years);
        self.standardize_all();
    }

    pub fn standardize_all(&mut self) {
        let calendar = self.calendar;
        self.infl_rate = Factor::Series(self.infl_rate.clone()).conform(&calendar);
        self.married = self.married.standardized(&calendar);
        for person in &mut self.people {
            person.standardize(&calendar);
        }
        for entity in self.entities_mut() {
            entity.standardize(&calendar);
        }
    }

    /// Append an entity and run its cascade.
    pub fn insert(&mut self, entity: impl Into<Entity>) -> PlanResult<ObjectId> {
        let entity = entity.into();
        let id = entity.id();
        self.ids.observe(id);
        match entity {
            Entity::Income(entity) => self.income.push(entity),
            Entity::Expense(entity) => self.expenses.push(entity),
            Entity::Asset(entity) => self.assets.push(entity),
            Entity::Liability(entity) => self.liabilities.push(entity),
        }
        self.project(id)?;
        Ok(id)
    }

    pub fn entity_ids(&self) -> Vec<ObjectId> {
        self.income
            .iter()
            .map(|e| e.core.id)
            .chain(self.expenses.iter().map(|e| e.core.id))
            .chain(self.assets.iter().map(|e| e.core.id))
            .chain(self.liabilities.iter().map(|e| e.core.id))
            .collect()
    }

    pub fn entities(&self) -> impl Iterator<Item = &dyn FinancialEntity> + '_ {
        self.income
            .iter()
            .map(|e| e as &dyn FinancialEntity)
            .chain(self.expenses.iter().map(|e| e as &dyn FinancialEntity))
            .chain(self.assets.iter().map(|e| e as &dyn FinancialEntity))
            .chain(self.liabilities.iter().map(|e| e as &dyn FinancialEntity))
    }

    fn entities_mut(&mut self) -> impl Iterator<Item = &mut dyn FinancialEntity> + '_ {
        self.income
            .iter_mut()
            .map(|e| e as &mut dyn FinancialEntity)
            .chain(self.expenses.iter_mut().map(|e| e as &mut dyn FinancialEntity))
            .chain(self.assets.iter_mut().map(|e| e as &mut dyn FinancialEntity))
            .chain(self.liabilities.iter_mut().map(|e| e as &mut dyn FinancialEntity))
    }

    pub fn entity(&self, id: ObjectId) -> Option<&dyn FinancialEntity> {
        match id.kind {
            ObjectKind::Income => find_in!(self.income, id).map(|e| e as &dyn FinancialEntity),
            ObjectKind::Expense => find_in!(self.expenses, id).map(|e| e as &dyn FinancialEntity),
            ObjectKind::Asset => find_in!(self.assets, id).map(|e| e as &dyn FinancialEntity),
            ObjectKind::Liability => {
                find_in!(self.liabilities, id).map(|e| e as &dyn FinancialEntity)
            }
            ObjectKind::Person => None,
        }
    }

    pub fn entity_mut(&mut self, id: ObjectId) -> Option<&mut dyn FinancialEntity> {
        match id.kind {
            ObjectKind::Income => {
                find_in_mut!(self.income, id).map(|e| e as &mut dyn FinancialEntity)
            }
            ObjectKind::Expense => {
                find_in_mut!(self.expenses, id).map(|e| e as &mut dyn FinancialEntity)
            }
            ObjectKind::Asset => {
                find_in_mut!(self.assets, id).map(|e| e as &mut dyn FinancialEntity)
            }
            ObjectKind::Liability => {
                find_in_mut!(self.liabilities, id).map(|e| e as &mut dyn FinancialEntity)
            }
            ObjectKind::Person => None,
        }
    }

    pub fn income(&self, id: ObjectId) -> Option<&Income> {
        find_in!(self.income, id)
    }

    pub fn income_mut(&mut self, id: ObjectId) -> Option<&mut Income> {
        find_in_mut!(self.income, id)
    }

    pub fn expense(&self, id: ObjectId) -> Option<&Expense> {
        find_in!(self.expenses, id)
    }

    pub fn expense_mut(&mut self, id: ObjectId) -> Option<&mut Expense> {
        find_in_mut!(self.expenses, id)
    }

    pub fn asset(&self, id: ObjectId) -> Option<&Asset> {
        find_in!(self.assets, id)
    }

    pub fn asset_mut(&mut self, id: ObjectId) -> Option<&mut Asset> {
        find_in_mut!(self.assets, id)
    }

    pub fn liability(&self, id: ObjectId) -> Option<&Liability> {
        find_in!(self.liabilities, id)
    }

    pub fn liability_mut(&mut self, id: ObjectId) -> Option<&mut Liability> {
        find_in_mut!(self.liabilities, id)
    }

    pub fn person(&self, id: ObjectId) -> Option<&Person> {
        self.people.iter().find(|person| person.id == id)
    }

    pub fn person_by_name(&self, name: &str) -> Option<&Person> {
        self.people.iter().find(|person| person.name == name)
    }

    /// Not-found is `None`, never an error.
    pub fn get_object_from_id(&self, id: ObjectId) -> Option<&dyn FinancialEntity> {
        self.entity(id)
    }

    /// Resolve a name to an id. With several matches a person must be given
    /// to disambiguate; a single match must belong to the given person if any.
    pub fn get_id_from_name(
        &self,
        kind: ObjectKind,
        name: &str,
        person: Option<Owner>,
    ) -> Option<ObjectId> {
        if kind == ObjectKind::Person {
            return self.person_by_name(name).map(|p| p.id);
        }
        let matches: Vec<&dyn FinancialEntity> = self
            .entities()
            .filter(|e| e.id().kind == kind && e.core().name == name)
            .collect();
        match (matches.as_slice(), person) {
            ([], _) => None,
            ([only], None) => Some(only.id()),
            ([only], Some(owner)) => {
                if only.core().person == owner {
                    Some(only.id())
                } else {
                    debug!(name, %owner, "object found, but with a different person");
                    None
                }
            }
            (_, None) => {
                debug!(name, "multiple objects found, a person is required");
                None
            }
            (many, Some(owner)) => {
                let found = many
                    .iter()
                    .find(|e| e.core().person == owner)
                    .map(|e| e.id());
                if found.is_none() {
                    debug!(name, %owner, "multiple objects found, none with that person");
                }
                found
            }
        }
    }

    pub fn get_object_from_name(
        &self,
        kind: ObjectKind,
        name: &str,
        person: Option<Owner>,
    ) -> Option<&dyn FinancialEntity> {
        self.get_id_from_name(kind, name, person)
            .and_then(|id| self.entity(id))
    }

    /// Expenses tagged with any of `keywords`, for the tax collaborator.
    pub fn get_tax_keyword_objects(&self, keywords: &[&str]) -> Vec<&Expense> {
        self.expenses
            .iter()
            .filter(|expense| keywords.contains(&expense.tax_keyword.as_str()))
            .collect()
    }

    /// Non-dependent people in plan order; the first is the designated adult.
    pub fn adults(&self) -> Vec<ObjectId> {
        self.people
            .iter()
            .filter(|person| !person.dependent)
            .map(|person| person.id)
            .collect()
    }

    pub fn projection_context(&self) -> ProjectionContext {
        ProjectionContext {
            calendar: self.calendar,
            infl_rate: self.infl_rate.clone(),
            adults: self.adults(),
        }
    }

    /// Total of one entity kind for a person (plus joint holdings), or for the
    /// whole household when `person` is `Joint`.
    pub fn aggregate(&mut self, kind: ObjectKind, person: Owner) -> Series {
        self.standardize_all();
        let owners: Vec<Owner> = match person {
            Owner::Joint => self
                .adults()
                .into_iter()
                .map(Owner::Person)
                .chain([Owner::Joint])
                .collect(),
            Owner::Person(_) => vec![person, Owner::Joint],
        };
        let calendar = self.calendar;
        if kind == ObjectKind::Expense {
            let people: Vec<ObjectId> = owners.iter().filter_map(|o| o.person()).collect();
            let parts = self
                .expenses
                .iter()
                .filter(|expense| owners.contains(&expense.core.person))
                .flat_map(|expense| {
                    people
                        .iter()
                        .filter_map(|p| expense.core.components.get(p))
                });
            return Series::sum(&calendar, parts);
        }
        let values = self
            .entities()
            .filter(|entity| entity.id().kind == kind && owners.contains(&entity.core().person))
            .map(|entity| &entity.core().value);
        Series::sum(&calendar, values)
    }

    pub fn is_married(&self, year: Year) -> bool {
        self.married.get(year) > 0.0
    }

    pub fn get_married(&mut self, year: Year) {
        self.marriage_year = Some(year);
        self.married = Series::from_pairs(
            self.calendar
                .years()
                .map(|y| (y, if y >= year { 1.0 } else { 0.0 })),
        );
        self.events.push(PlanEvent {
            year,
            label: "Get Married".to_string(),
            payload: EventPayload::Marriage,
        });
    }

    /// Fraction of joint spending carried by the designated adult each year.
    pub fn expense_share_series(&self) -> Series {
        let calendar = self.calendar;
        match self.expense_share {
            ExpenseSharePolicy::Even => Series::constant(&calendar, 0.5),
            ExpenseSharePolicy::Proportional => {
                let adults = self.adults();
                let Some(designated) = adults.first().copied() else {
                    return Series::constant(&calendar, 0.5);
                };
                let earned = |person: ObjectId| {
                    Series::sum(
                        &calendar,
                        self.income
                            .iter()
                            .filter(|income| {
                                income.core.category == category::EARNED
                                    && income.core.person == Owner::Person(person)
                            })
                            .map(|income| &income.core.value),
                    )
                };
                let own = earned(designated);
                let earnings: Vec<Series> = adults.iter().map(|p| earned(*p)).collect();
                let total = Series::sum(&calendar, &earnings);
                own.zip_with(&total, |own, total| if total > 0.0 { own / total } else { 0.5 })
            }
        }
    }

    fn check_link(&self, parent: ObjectId, child: ObjectId) -> PlanResult<()> {
        if parent == child {
            return Err(PlanError::InvalidLink {
                parent,
                child,
                reason: "an entity cannot feed itself".to_string(),
            });
        }
        for id in [parent, child] {
            if self.entity(id).is_none() {
                return Err(PlanError::UnknownEntity(id));
            }
        }
        Ok(())
    }

    fn mark_parent(&mut self, parent: ObjectId) {
        if let Some(entity) = self.entity_mut(parent) {
            entity.core_mut().dependent_objs = true;
        }
    }

    pub fn link_series(&mut self, parent: ObjectId, child: ObjectId, link: SeriesLink) -> PlanResult<()> {
        self.check_link(parent, child)?;
        if !link.source.readable_on(parent.kind) || !link.target.writable_on(child.kind) {
            return Err(PlanError::InvalidLink {
                parent,
                child,
                reason: format!("cannot feed {:?} into {:?}", link.source, link.target),
            });
        }
        if let Some(entity) = self.entity_mut(child) {
            entity
                .core_mut()
                .paired_attr
                .series
                .entry(parent)
                .or_default()
                .push(link);
        }
        self.pairs.insert(Namespace::Series, parent, child);
        self.mark_parent(parent);
        Ok(())
    }

    pub fn link_time(&mut self, parent: ObjectId, child: ObjectId, link: TimeLink) -> PlanResult<()> {
        self.check_link(parent, child)?;
        if let Some(entity) = self.entity_mut(child) {
            entity
                .core_mut()
                .paired_attr
                .time
                .entry(parent)
                .or_default()
                .push(link);
        }
        self.pairs.insert(Namespace::Time, parent, child);
        self.mark_parent(parent);
        Ok(())
    }

    pub fn link_span(&mut self, parent: ObjectId, child: ObjectId) -> PlanResult<()> {
        for link in TimeLink::span() {
            self.link_time(parent, child, link)?;
        }
        Ok(())
    }

    pub fn link_share(&mut self, parent: ObjectId, child: ObjectId, link: ShareLink) -> PlanResult<()> {
        self.check_link(parent, child)?;
        if parent.kind != ObjectKind::Income || child.kind != ObjectKind::Expense {
            return Err(PlanError::InvalidLink {
                parent,
                child,
                reason: "share links run from an income to an expense".to_string(),
            });
        }
        if let Some(entity) = self.entity_mut(child) {
            let links = entity.core_mut().paired_attr.share.entry(parent).or_default();
            if !links.contains(&link) {
                links.push(link);
            }
        }
        self.pairs.insert(Namespace::Share, parent, child);
        self.mark_parent(parent);
        Ok(())
    }

    /// Drop every link from `parent` to `child`, on both sides.
    pub fn unlink(&mut self, parent: ObjectId, child: ObjectId) -> Vec<Namespace> {
        let severed = self
            .entity_mut(child)
            .map(|entity| entity.core_mut().paired_attr.sever(parent))
            .unwrap_or_default();
        self.pairs.remove_pair(parent, child);
        self.refresh_dependent_flags();
        severed
    }

    pub(crate) fn refresh_dependent_flags(&mut self) {
        let parents: BTreeSet<ObjectId> = self.pairs.all().map(|(_, (parent, _))| parent).collect();
        for entity in self.entities_mut() {
            let id = entity.id();
            entity.core_mut().dependent_objs = parents.contains(&id);
        }
    }

    /// True when the edge registry mirrors the links stored on the entities.
    pub fn edges_consistent(&self) -> bool {
        let mut stored: BTreeSet<(Namespace, ObjectId, ObjectId)> = BTreeSet::new();
        for entity in self.entities() {
            let child = entity.id();
            let paired = &entity.core().paired_attr;
            stored.extend(paired.series.keys().map(|p| (Namespace::Series, *p, child)));
            stored.extend(paired.time.keys().map(|p| (Namespace::Time, *p, child)));
            stored.extend(paired.share.keys().map(|p| (Namespace::Share, *p, child)));
        }
        let registered: BTreeSet<(Namespace, ObjectId, ObjectId)> = self
            .pairs
            .all()
            .map(|(namespace, (parent, child))| (namespace, parent, child))
            .collect();
        stored == registered
    }

    /// Remove an entity (or person). Children that were fed only by it through
    /// `series`/`time` links are removed too. Removing a person removes what
    /// they own and re-splits joint entities. Returns every removed id.
    pub fn remove_object_by_id(&mut self, id: ObjectId) -> PlanResult<Vec<ObjectId>> {
        let mut removed = Vec::new();
        let mut survivors = BTreeSet::new();
        self.remove_recursive(id, &mut removed, &mut survivors);
        self.refresh_dependent_flags();
        for id in survivors {
            if self.entity(id).is_some() {
                self.project(id)?;
            }
        }
        Ok(removed)
    }

    fn remove_recursive(
        &mut self,
        id: ObjectId,
        removed: &mut Vec<ObjectId>,
        survivors: &mut BTreeSet<ObjectId>,
    ) {
        if id.kind == ObjectKind::Person {
            if self.person(id).is_none() {
                return;
            }
            let owned: Vec<ObjectId> = self
                .entities()
                .filter(|entity| entity.core().person == Owner::Person(id))
                .map(|entity| entity.id())
                .collect();
            for entity in owned {
                self.remove_recursive(entity, removed, survivors);
            }
            self.people.retain(|person| person.id != id);
            self.drawdown_order.remove(&id);
            for expense in &mut self.expenses {
                if let Some(children) = expense.child_components.as_mut() {
                    children.remove(&id);
                }
            }
            survivors.extend(self.joint_ids());
            removed.push(id);
            return;
        }
        if self.entity(id).is_none() {
            return;
        }
        for child in self.pairs.children_of(id) {
            let Some(entity) = self.entity_mut(child) else {
                continue;
            };
            let severed = entity.core_mut().paired_attr.sever(id);
            let paired = &entity.core().paired_attr;
            let unfed = paired.series.is_empty() && paired.time.is_empty();
            let fed = severed
                .iter()
                .any(|ns| matches!(ns, Namespace::Series | Namespace::Time));
            self.pairs.remove_pair(id, child);
            if fed && unfed {
                debug!(%child, parent = %id, "pruning orphaned dependent");
                survivors.remove(&child);
                self.remove_recursive(child, removed, survivors);
            } else {
                survivors.insert(child);
            }
        }
        self.pairs.remove_touching(id);
        match id.kind {
            ObjectKind::Income => self.income.retain(|e| e.core.id != id),
            ObjectKind::Expense => self.expenses.retain(|e| e.core.id != id),
            ObjectKind::Asset => self.assets.retain(|e| e.core.id != id),
            ObjectKind::Liability => self.liabilities.retain(|e| e.core.id != id),
            ObjectKind::Person => {}
        }
        for entity in self.entities_mut() {
            entity.core_mut().paired_attr.sever(id);
        }
        for accounts in self.drawdown_order.values_mut() {
            accounts.retain(|account| *account != id);
        }
        for asset in &mut self.assets {
            if asset.linked_liability == Some(id) {
                asset.linked_liability = None;
            }
        }
        for income in &mut self.income {
            if let Some(params) = income.pension_params.as_mut() {
                if params.contribution_expense == Some(id) {
                    params.contribution_expense = None;
                }
                if params.equivalent_asset == Some(id) {
                    params.equivalent_asset = None;
                }
            }
        }
        survivors.remove(&id);
        removed.push(id);
    }

    fn walk(&self, id: ObjectId, next: impl Fn(ObjectId) -> Vec<ObjectId>) -> Vec<ObjectId> {
        let mut seen = BTreeSet::from([id]);
        let mut queue = VecDeque::from([id]);
        let mut out = Vec::new();
        while let Some(current) = queue.pop_front() {
            for found in next(current) {
                if seen.insert(found) {
                    out.push(found);
                    queue.push_back(found);
                }
            }
        }
        out
    }

    /// Everything reachable downstream of `id`, breadth first.
    pub fn descendants(&self, id: ObjectId) -> Vec<ObjectId> {
        self.walk(id, |current| self.pairs.children_of(current))
    }

    pub fn ancestors(&self, id: ObjectId) -> Vec<ObjectId> {
        self.walk(id, |current| self.pairs.parents_of(current))
    }

    /// `id` together with its ancestors and descendants.
    pub fn related_objects(&self, id: ObjectId) -> BTreeSet<ObjectId> {
        let mut related = BTreeSet::from([id]);
        related.extend(self.ancestors(id));
        related.extend(self.descendants(id));
        related
    }

    pub fn future_event_object_ids(&self) -> BTreeSet<ObjectId> {
        self.entities()
            .filter(|entity| entity.core().future_event)
            .map(|entity| entity.id())
            .collect()
    }

    /// Renumber each collection by descending starting value and rewrite every
    /// reference to the old ids.
    pub fn reorder_object_ids(&mut self) {
        fn start_value<E: FinancialEntity>(entity: &E) -> f64 {
            let core = entity.core();
            if core.value.is_empty() {
                return 0.0;
            }
            match core.value.first_year() {
                Some(first) if core.start_year < first => core.value.get(first),
                _ => core.value.get(core.start_year),
            }
        }
        fn renumber<E: FinancialEntity>(
            list: &mut [E],
            kind: ObjectKind,
            map: &mut BTreeMap<ObjectId, ObjectId>,
        ) {
            list.sort_by(|a, b| start_value(b).total_cmp(&start_value(a)));
            for (idx, entity) in list.iter().enumerate() {
                map.insert(entity.id(), ObjectId::new(kind, idx as u32 + 1));
            }
        }

        let mut map = BTreeMap::new();
        renumber(&mut self.income, ObjectKind::Income, &mut map);
        renumber(&mut self.expenses, ObjectKind::Expense, &mut map);
        renumber(&mut self.assets, ObjectKind::Asset, &mut map);
        renumber(&mut self.liabilities, ObjectKind::Liability, &mut map);

        for entity in self.entities_mut() {
            entity.remap_ids(&map);
        }
        self.pairs.remap(&map);
        for accounts in self.drawdown_order.values_mut() {
            for account in accounts.iter_mut() {
                remap_id(account, &map);
            }
        }
        for event in &mut self.events {
            match &mut event.payload {
                EventPayload::Object { id } => remap_id(id, &map),
                EventPayload::Purchase {
                    asset,
                    liability,
                    sources,
                } => {
                    remap_id(asset, &map);
                    if let Some(liability) = liability.as_mut() {
                        remap_id(liability, &map);
                    }
                    for source in sources.iter_mut() {
                        remap_id(&mut source.account, &map);
                    }
                }
                EventPayload::Marriage | EventPayload::Combination { .. } => {}
            }
        }
        for (kind, count) in [
            (ObjectKind::Income, self.income.len()),
            (ObjectKind::Expense, self.expenses.len()),
            (ObjectKind::Asset, self.assets.len()),
            (ObjectKind::Liability, self.liabilities.len()),
        ] {
            self.ids.reset(kind, count as u32);
        }
    }

    /// Projects income, expenses, liabilities, then assets.
    pub fn project_all(&mut self) -> PlanResult<()> {
        let order: Vec<ObjectId> = self
            .income
            .iter()
            .map(|e| e.core.id)
            .chain(self.expenses.iter().map(|e| e.core.id))
            .chain(self.liabilities.iter().map(|e| e.core.id))
            .chain(self.assets.iter().map(|e| e.core.id))
            .collect();
        for id in order {
            if self.entity(id).is_some() {
                self.project(id)?;
            }
        }
        Ok(())
    }
}
