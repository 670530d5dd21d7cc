use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, info};

use super::asset::SaleState;
use super::entity::{
    FinancialEntity, Ledger, Posting, ProjectionContext, SeriesAttr, ShareLink, TimeAttr,
    owner_components,
};
use super::error::{PlanError, PlanResult};
use super::income::IncomeRole;
use super::plan::Plan;
use super::series::{Series, cumulative_inflation};
use super::types::{ObjectId, ObjectKind, Year, category};

/// What one cascade did.
#[derive(Clone, Debug, PartialEq)]
pub struct CascadeReport {
    pub origin: ObjectId,
    /// Every projection in the order it ran; the origin appears twice when a
    /// cycle led back to it.
    pub projected: Vec<ObjectId>,
    /// Times the cascade stopped because it returned to its origin.
    pub cycle_terminations: usize,
}

impl CascadeReport {
    pub fn times_projected(&self, id: ObjectId) -> usize {
        self.projected.iter().filter(|p| **p == id).count()
    }
}

impl Plan {
    /// Recompute `id` and everything downstream of it.
    ///
    /// Breadth first over the edge registry. Each entity is expanded once;
    /// when a cycle leads back to the origin it is recomputed a second time
    /// and the walk stops there. An account whose ledger a sale or reversal
    /// changed after it was expanded is expanded again, together with its
    /// downstream entities, at most once per cascade. Fails with
    /// `ReentrantCascade` if called while another cascade is running.
    pub fn project(&mut self, id: ObjectId) -> PlanResult<CascadeReport> {
        if self.in_cascade {
            return Err(PlanError::ReentrantCascade);
        }
        self.in_cascade = true;
        let result = self.cascade(id);
        self.in_cascade = false;
        result
    }

    fn cascade(&mut self, origin: ObjectId) -> PlanResult<CascadeReport> {
        let mut report = CascadeReport {
            origin,
            projected: Vec::new(),
            cycle_terminations: 0,
        };
        let mut expanded = BTreeSet::new();
        let mut refreshed = BTreeSet::new();
        let mut queue = VecDeque::from([origin]);

        while let Some(id) = queue.pop_front() {
            if self.entity(id).is_none() {
                debug!(%id, "skipping dangling id in cascade");
                continue;
            }
            if expanded.contains(&id) {
                if id == origin && report.cycle_terminations == 0 {
                    let touched = self.project_one(id)?;
                    report.projected.push(id);
                    report.cycle_terminations += 1;
                    debug!(%origin, "cycle guard: cascade returned to its origin");
                    self.requeue_touched(touched, origin, &mut expanded, &mut refreshed, &mut queue);
                }
                continue;
            }

            let touched = self.project_one(id)?;
            report.projected.push(id);
            expanded.insert(id);

            let has_children = self
                .entity(id)
                .is_some_and(|entity| entity.core().dependent_objs);
            if has_children {
                queue.extend(self.pairs.children_of(id));
            }
            self.requeue_touched(touched, origin, &mut expanded, &mut refreshed, &mut queue);
        }

        debug!(
            %origin,
            projected = report.projected.len(),
            "cascade finished"
        );
        Ok(report)
    }

    /// Queue accounts whose ledgers changed. One already expanded this cascade
    /// is released, with everything downstream of it except the origin, so it
    /// is recomputed against the new postings.
    fn requeue_touched(
        &self,
        touched: Vec<ObjectId>,
        origin: ObjectId,
        expanded: &mut BTreeSet<ObjectId>,
        refreshed: &mut BTreeSet<ObjectId>,
        queue: &mut VecDeque<ObjectId>,
    ) {
        for account in touched {
            if !expanded.contains(&account) {
                queue.push_back(account);
            } else if refreshed.insert(account) {
                expanded.remove(&account);
                for descendant in self.descendants(account) {
                    if descendant != origin {
                        expanded.remove(&descendant);
                    }
                }
                queue.push_back(account);
            } else {
                debug!(%account, "account already refreshed once this cascade");
            }
        }
    }

    /// Recompute a single entity. Returns other accounts whose ledgers changed
    /// because of a sale.
    fn project_one(&mut self, id: ObjectId) -> PlanResult<Vec<ObjectId>> {
        let ctx = self.projection_context();
        let calendar = ctx.calendar;

        if let Some(entity) = self.entity_mut(id) {
            entity.standardize(&calendar);
        }
        if let Some(expense) = self.expense_mut(id) {
            expense.recompute_child_input(&calendar);
        }

        for (attr, series) in self.pull_series(id, &ctx) {
            if let Some(entity) = self.entity_mut(id) {
                entity.write_series(attr, series)?;
            }
        }

        let mut touched = self.pull_time(id)?;
        self.refresh_share(id)?;

        if let Some(entity) = self.entity_mut(id) {
            entity.update(&ctx)?;
            entity.standardize(&calendar);
            if id.kind != ObjectKind::Expense {
                let core = entity.core_mut();
                core.components = owner_components(&core.value, core.person, &ctx.adults);
            }
        }

        let resell = self
            .asset(id)
            .filter(|asset| asset.sold == SaleState::Reversed)
            .map(|asset| asset.core.end_year);
        if let Some(year) = resell {
            touched.extend(self.post_sale(id, year)?);
        }
        Ok(touched)
    }

    /// Values pulled from `series` parents, summed per target attribute.
    fn pull_series(&self, id: ObjectId, ctx: &ProjectionContext) -> Vec<(SeriesAttr, Series)> {
        let Some(child) = self.entity(id) else {
            return Vec::new();
        };
        let calendar = ctx.calendar;
        let escalation = cumulative_inflation(&ctx.infl_rate, child.core().start_year, &calendar);
        let employer_match = self
            .income(id)
            .is_some_and(|income| income.role == IncomeRole::EmployerMatch);

        let read = |parent: &dyn FinancialEntity, attr: SeriesAttr| {
            parent
                .read_series(attr)
                .map(|series| series.standardized(&calendar))
                .unwrap_or_else(|| Series::zeros(&calendar))
        };

        let mut totals: BTreeMap<SeriesAttr, Series> = BTreeMap::new();
        let mut accumulate = |target: SeriesAttr, pulled: Series| match totals.get_mut(&target) {
            Some(total) => *total = total.plus(&pulled),
            None => {
                totals.insert(target, pulled);
            }
        };
        let mut non_negative_value = false;

        for (parent_id, links) in &child.core().paired_attr.series {
            let Some(parent) = self.entity(*parent_id) else {
                debug!(child = %id, parent = %parent_id, "series parent missing");
                continue;
            };
            if employer_match {
                let Some(first) = links.first() else {
                    continue;
                };
                let Some(proportion) = links
                    .iter()
                    .map(|link| link.proportion.conform(&calendar))
                    .reduce(|a, b| a.min_with(&b))
                else {
                    continue;
                };
                let mut pulled = read(parent, first.source).times(&proportion);
                let cap = links
                    .iter()
                    .filter_map(|link| link.cap.as_ref())
                    .map(|cap| cap.conform(&calendar).times(&escalation))
                    .reduce(|a, b| a.min_with(&b));
                if let Some(cap) = cap {
                    pulled = pulled.min_with(&cap);
                }
                accumulate(first.target, pulled);
                continue;
            }
            for link in links {
                let mut pulled = read(parent, link.source).times(&link.proportion.conform(&calendar));
                if let Some(cap) = &link.cap {
                    pulled = pulled.min_with(&cap.conform(&calendar).times(&escalation));
                }
                if id.kind == ObjectKind::Expense
                    && parent_id.kind == ObjectKind::Asset
                    && link.source == SeriesAttr::Contribution
                    && link.target == SeriesAttr::Value
                {
                    non_negative_value = true;
                }
                accumulate(link.target, pulled);
            }
        }

        if non_negative_value {
            if let Some(value) = totals.get_mut(&SeriesAttr::Value) {
                *value = value.clamp_min(0.0);
            }
        }
        totals.into_iter().collect()
    }

    /// Copy boundary years from `time` parents. A sold asset whose end year is
    /// driven by a parent has its sale reversed so it can be re-sold.
    fn pull_time(&mut self, id: ObjectId) -> PlanResult<Vec<ObjectId>> {
        let Some(child) = self.entity(id) else {
            return Ok(Vec::new());
        };
        let links: Vec<_> = child
            .core()
            .paired_attr
            .time
            .iter()
            .flat_map(|(parent, links)| links.iter().map(move |link| (*parent, *link)))
            .collect();

        let mut touched = Vec::new();
        for (parent, link) in links {
            let Some(year) = self
                .entity(parent)
                .map(|parent| parent.time(link.source) + link.offset)
            else {
                debug!(child = %id, %parent, "time parent missing");
                continue;
            };
            if let Some(entity) = self.entity_mut(id) {
                entity.set_time(link.target, year);
            }
            let sold = self
                .asset(id)
                .is_some_and(|asset| asset.sold == SaleState::Sold);
            if sold && link.target == TimeAttr::EndYear {
                touched.extend(self.post_reversal(id)?);
            }
        }
        Ok(touched)
    }

    /// Joint expenses get their share configuration on first projection and
    /// re-read it whenever they carry share links.
    fn refresh_share(&mut self, id: ObjectId) -> PlanResult<()> {
        let Some(expense) = self.expense(id) else {
            return Ok(());
        };
        if !expense.core.person.is_joint() {
            return Ok(());
        }
        let initialise = expense.share_props.is_none();
        let linked = !expense.core.paired_attr.share.is_empty();
        if initialise {
            let adults = self.adults();
            let earners: Vec<ObjectId> = self
                .income
                .iter()
                .filter(|income| {
                    income.core.category == category::EARNED
                        && income.core.person.person().is_some_and(|p| adults.contains(&p))
                })
                .map(|income| income.core.id)
                .collect();
            for earner in earners {
                self.link_share(earner, id, ShareLink {
                    source: SeriesAttr::Value,
                })?;
            }
        }
        if initialise || linked {
            let share = self.expense_share_series();
            if let Some(expense) = self.expense_mut(id) {
                expense.share_props = Some(share);
            }
        }
        Ok(())
    }

    /// Apply one ledger change to an account.
    pub(crate) fn apply_posting(&mut self, posting: &Posting) {
        let Posting {
            account,
            year,
            amount,
            ledger,
        } = *posting;
        match (account.kind, ledger) {
            (ObjectKind::Liability, _) => {
                if let Some(liability) = self.liability_mut(account) {
                    liability.charges.add(year, amount);
                }
            }
            (ObjectKind::Asset, Ledger::Contribution) => {
                if let Some(asset) = self.asset_mut(account) {
                    asset.contribution.add(year, amount);
                }
            }
            (ObjectKind::Asset, _) => {
                if let Some(asset) = self.asset_mut(account) {
                    asset.deposit(amount, year);
                }
            }
            _ => debug!(%account, "posting to a non-account ignored"),
        }
    }

    /// Book the proceeds of selling `id` in `year` for each owner: a positive
    /// net goes into the owner's first drawdown account, a shortfall is drawn
    /// down. Returns the accounts touched.
    pub(crate) fn post_sale(&mut self, id: ObjectId, year: Year) -> PlanResult<Vec<ObjectId>> {
        let Some(asset) = self.asset(id) else {
            return Err(PlanError::UnknownEntity(id));
        };
        let components = asset.core.components.clone();
        let linked = asset.linked_liability;
        let adults = self.adults();

        let mut postings = Vec::new();
        for (person, component) in components {
            let owed = linked
                .and_then(|liability| self.liability(liability))
                .map(|liability| liability.balance_for_sale(person, year, &adults))
                .unwrap_or(0.0);
            let net = component.get(year) - owed;
            if net >= 0.0 {
                let account = self
                    .drawdown_order
                    .get(&person)
                    .and_then(|accounts| accounts.iter().find(|a| **a != id).copied());
                match account {
                    Some(account) => {
                        let posting = Posting {
                            account,
                            year,
                            amount: net,
                            ledger: Ledger::Transaction,
                        };
                        self.apply_posting(&posting);
                        postings.push(posting);
                    }
                    None => debug!(%id, %person, "no drawdown account for sale proceeds"),
                }
            } else {
                let outcome = self.post_drawdown(net, year, person, Ledger::Transaction)?;
                postings.extend(outcome.postings);
            }
        }

        let touched = touched_accounts(&postings);
        if let Some(asset) = self.asset_mut(id) {
            asset.transition(SaleState::Sold, year)?;
            asset.sale_postings = postings;
        }
        info!(%id, year, "asset sold");
        Ok(touched)
    }

    /// Undo every ledger change the last sale made.
    pub(crate) fn post_reversal(&mut self, id: ObjectId) -> PlanResult<Vec<ObjectId>> {
        let Some(asset) = self.asset_mut(id) else {
            return Err(PlanError::UnknownEntity(id));
        };
        let year = asset.core.end_year;
        asset.transition(SaleState::Reversed, year)?;
        let postings = std::mem::take(&mut asset.sale_postings);
        for posting in &postings {
            self.apply_posting(&Posting {
                amount: -posting.amount,
                ..*posting
            });
        }
        debug!(%id, "asset sale reversed");
        Ok(touched_accounts(&postings))
    }

    /// Sell an asset at `year`: its ownership (and any linked liability) ends
    /// that year and the net proceeds are booked.
    pub fn sell_asset(&mut self, id: ObjectId, year: Year) -> PlanResult<()> {
        let Some(asset) = self.asset_mut(id) else {
            return Err(PlanError::UnknownEntity(id));
        };
        asset.core.end_year = year;
        let linked = asset.linked_liability;
        if let Some(liability) = linked.and_then(|l| self.liability_mut(l)) {
            liability.core.end_year = year;
        }
        if let Some(liability) = linked {
            self.project(liability)?;
        }
        self.project(id)?;
        let touched = self.post_sale(id, year)?;
        for account in touched {
            self.project(account)?;
        }
        Ok(())
    }

    /// Undo a sale and restore ownership to the end of the calendar. The asset
    /// is left awaiting a re-sale.
    pub fn reverse_sale(&mut self, id: ObjectId) -> PlanResult<()> {
        let last = self.calendar.last();
        let Some(asset) = self.asset_mut(id) else {
            return Err(PlanError::UnknownEntity(id));
        };
        if asset.sold != SaleState::Sold {
            return Err(PlanError::SaleTransition {
                id,
                year: asset.core.end_year,
                reason: format!("cannot reverse a sale from {:?}", asset.sold),
            });
        }
        asset.core.end_year = last;
        let linked = asset.linked_liability;
        if let Some(liability) = linked.and_then(|l| self.liability_mut(l)) {
            liability.core.end_year = last;
        }
        if let Some(liability) = linked {
            self.project(liability)?;
        }
        self.project(id)?;
        let touched = self.post_reversal(id)?;
        for account in touched {
            self.project(account)?;
        }
        Ok(())
    }
}

fn touched_accounts(postings: &[Posting]) -> Vec<ObjectId> {
    let mut out = Vec::new();
    for posting in postings {
        if !out.contains(&posting.account) {
            out.push(posting.account);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::asset::Asset;
    use crate::core::entity::{SeriesLink, TimeLink};
    use crate::core::expense::Expense;
    use crate::core::income::Income;
    use crate::core::types::Owner;

    fn assert_approx(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual} (tol {tol})"
        );
    }

    fn plan() -> (Plan, ObjectId) {
        let mut plan = Plan::new("Test", 2025, 5, 0.0, 0.0);
        let alex = plan.add_person("Alex", 1990, false).expect("add person");
        (plan, alex)
    }

    fn income(plan: &mut Plan, person: ObjectId, name: &str, value: f64) -> ObjectId {
        let id = plan.next_id(ObjectKind::Income);
        let income = Income::new(
            id,
            Owner::Person(person),
            category::EARNED,
            "Salary",
            name,
            &plan.calendar,
            value,
            false,
            true,
        );
        plan.insert(income).expect("insert income")
    }

    fn cash(plan: &mut Plan, person: ObjectId, name: &str, value: f64) -> ObjectId {
        let id = plan.next_id(ObjectKind::Asset);
        let asset = Asset::new(
            id,
            Owner::Person(person),
            category::SAVINGS,
            "Cash",
            name,
            "",
            &plan.calendar,
            value,
            0.0,
            0.0,
        );
        plan.insert(asset).expect("insert asset")
    }

    #[test]
    fn three_entity_cycle_terminates_at_origin() {
        let (mut plan, alex) = plan();
        let x = income(&mut plan, alex, "X", 100.0);
        let y = income(&mut plan, alex, "Y", 0.0);
        let z = income(&mut plan, alex, "Z", 0.0);
        let feed = || SeriesLink::new(SeriesAttr::Value, SeriesAttr::ValueInput, 1.0);
        plan.link_series(x, y, feed()).expect("x -> y");
        plan.link_series(y, z, feed()).expect("y -> z");
        plan.link_series(z, x, feed()).expect("z -> x");

        let report = plan.project(x).expect("cascade");
        assert_eq!(report.times_projected(x), 2);
        assert_eq!(report.times_projected(y), 1);
        assert_eq!(report.times_projected(z), 1);
        assert_eq!(report.cycle_terminations, 1);
        assert!(!plan.in_cascade);
    }

    #[test]
    fn diamond_grandchild_projects_once_after_both_parents() {
        let (mut plan, alex) = plan();
        let root = income(&mut plan, alex, "Root", 100.0);
        let left = income(&mut plan, alex, "Left", 0.0);
        let right = income(&mut plan, alex, "Right", 0.0);
        let sink = income(&mut plan, alex, "Sink", 0.0);
        let feed = || SeriesLink::new(SeriesAttr::Value, SeriesAttr::ValueInput, 1.0);
        plan.link_series(root, left, feed()).expect("link");
        plan.link_series(root, right, feed()).expect("link");
        plan.link_series(left, sink, feed()).expect("link");
        plan.link_series(right, sink, feed()).expect("link");

        let report = plan.project(root).expect("cascade");
        assert_eq!(report.projected, vec![root, left, right, sink]);
        assert_approx(plan.income(sink).expect("sink").core.value.get(2026), 200.0, 1e-9);
    }

    #[test]
    fn reentrant_projection_is_rejected() {
        let (mut plan, alex) = plan();
        let x = income(&mut plan, alex, "X", 100.0);
        plan.in_cascade = true;
        assert!(matches!(plan.project(x), Err(PlanError::ReentrantCascade)));
    }

    #[test]
    fn employer_match_takes_minimum_then_escalated_cap() {
        let mut plan = Plan::new("Test", 2025, 3, 0.1, 0.0);
        let alex = plan.add_person("Alex", 1990, false).expect("add person");
        let salary = income(&mut plan, alex, "Job", 100_000.0);
        let id = plan.next_id(ObjectKind::Income);
        let mut matched = Income::new(
            id,
            Owner::Person(alex),
            category::EXTERNAL,
            "Employer Match",
            "Job",
            &plan.calendar,
            0.0,
            true,
            false,
        );
        matched.role = IncomeRole::EmployerMatch;
        let matched = plan.insert(matched).expect("insert");
        plan.link_series(salary, matched, SeriesLink::new(SeriesAttr::Value, SeriesAttr::Value, 0.5))
            .expect("link");
        plan.link_series(
            salary,
            matched,
            SeriesLink::new(SeriesAttr::Value, SeriesAttr::Value, 0.03).with_cap(2_000.0),
        )
        .expect("link");
        plan.project(salary).expect("cascade");

        let value = &plan.income(matched).expect("match").core.value;
        assert_approx(value.get(2025), 2_000.0, 1e-9);
        // cap escalates with inflation from the match's own start year
        assert_approx(value.get(2026), 2_200.0, 1e-9);
    }

    #[test]
    fn contribution_expense_never_goes_negative() {
        let (mut plan, alex) = plan();
        let account = cash(&mut plan, alex, "Brokerage", 1_000.0);
        let cal = plan.calendar;
        if let Some(asset) = plan.asset_mut(account) {
            asset.contribution = Series::constant(&cal, -50.0);
        }
        let id = plan.next_id(ObjectKind::Expense);
        let saving = Expense::new(
            id,
            Owner::Person(alex),
            category::SAVINGS,
            "Brokerage",
            "Brokerage",
            "",
            &plan.calendar,
            0.0,
            true,
        );
        let saving = plan.insert(saving).expect("insert");
        plan.link_series(
            account,
            saving,
            SeriesLink::new(SeriesAttr::Contribution, SeriesAttr::Value, 1.0),
        )
        .expect("link");
        plan.project(account).expect("cascade");
        assert_eq!(plan.expense(saving).expect("expense").core.value.get(2026), 0.0);
    }

    #[test]
    fn joint_expense_registers_share_links_on_first_projection() {
        let (mut plan, alex) = plan();
        let sam = plan.add_person("Sam", 1992, false).expect("add person");
        let job = income(&mut plan, alex, "Job", 90.0);
        let id = plan.next_id(ObjectKind::Expense);
        let rent = Expense::new(
            id,
            Owner::Joint,
            category::NECESSARY,
            "Housing",
            "Rent",
            "",
            &plan.calendar,
            1_000.0,
            false,
        );
        let rent = plan.insert(rent).expect("insert");
        let expense = plan.expense(rent).expect("rent");
        assert!(expense.core.paired_attr.share.contains_key(&job));
        assert_eq!(expense.core.components[&alex].get(2025), 500.0);
        assert_eq!(expense.core.components[&sam].get(2025), 500.0);
        assert!(plan.edges_consistent());
    }

    #[test]
    fn sell_then_reverse_restores_ledgers() {
        let (mut plan, alex) = plan();
        let savings = cash(&mut plan, alex, "Savings", 0.0);
        let car = cash(&mut plan, alex, "Car", 8_000.0);
        plan.set_drawdown_order(alex, vec![savings]);
        let before = plan.asset(savings).expect("savings").transaction.clone();

        plan.sell_asset(car, 2027).expect("sell");
        assert_eq!(plan.asset(car).expect("car").sold, SaleState::Sold);
        assert_eq!(plan.asset(savings).expect("savings").transaction.get(2027), 8_000.0);
        assert_eq!(plan.asset(savings).expect("savings").core.value.get(2028), 8_000.0);

        plan.reverse_sale(car).expect("reverse");
        let asset = plan.asset(car).expect("car");
        assert_eq!(asset.sold, SaleState::Reversed);
        assert_eq!(asset.core.end_year, 2030);
        assert!(asset.sale_postings.is_empty());
        assert_eq!(plan.asset(savings).expect("savings").transaction, before);
    }

    #[test]
    fn time_linked_sale_moves_with_parent_end_year() {
        let (mut plan, alex) = plan();
        let savings = cash(&mut plan, alex, "Savings", 0.0);
        let job = income(&mut plan, alex, "Job", 10.0);
        let car = cash(&mut plan, alex, "Car", 5_000.0);
        plan.set_drawdown_order(alex, vec![savings]);
        plan.link_time(job, car, TimeLink::new(TimeAttr::EndYear, TimeAttr::EndYear, 0))
            .expect("link");
        if let Some(income) = plan.income_mut(job) {
            income.core.end_year = 2027;
        }
        plan.project(job).expect("cascade");
        plan.sell_asset(car, 2027).expect("sell");

        if let Some(income) = plan.income_mut(job) {
            income.core.end_year = 2029;
        }
        plan.project(job).expect("cascade");
        let car_asset = plan.asset(car).expect("car");
        assert_eq!(car_asset.sold, SaleState::Sold);
        assert_eq!(car_asset.core.end_year, 2029);
        let ledger = &plan.asset(savings).expect("savings").transaction;
        assert_eq!(ledger.get(2027), 0.0);
        assert_eq!(ledger.get(2029), 5_000.0);
    }

    #[test]
    fn proceeds_account_is_recomputed_when_a_later_sale_moves() {
        let (mut plan, alex) = plan();
        let savings = cash(&mut plan, alex, "Savings", 1_000.0);
        let house = cash(&mut plan, alex, "House", 100_000.0);
        let job = income(&mut plan, alex, "Job", 50_000.0);
        plan.set_drawdown_order(alex, vec![savings]);
        // savings is a child of the job, so it is expanded before the house
        plan.link_series(
            job,
            savings,
            SeriesLink::new(SeriesAttr::Value, SeriesAttr::Contribution, 0.0),
        )
        .expect("link");
        plan.link_time(job, house, TimeLink::new(TimeAttr::EndYear, TimeAttr::EndYear, 0))
            .expect("link");
        if let Some(income) = plan.income_mut(job) {
            income.core.end_year = 2026;
        }
        plan.project(job).expect("cascade");
        plan.sell_asset(house, 2026).expect("sell");
        assert_eq!(plan.asset(savings).expect("savings").core.value.get(2026), 101_000.0);

        if let Some(income) = plan.income_mut(job) {
            income.core.end_year = 2028;
        }
        let report = plan.project(job).expect("cascade");
        assert_eq!(report.times_projected(savings), 2);

        let value = plan.asset(savings).expect("savings").core.value.clone();
        assert_eq!(value.get(2026), 1_000.0);
        assert_eq!(value.get(2027), 1_000.0);
        assert_eq!(value.get(2028), 101_000.0);

        // a fresh projection agrees with what the cascade left behind
        plan.project(savings).expect("cascade");
        assert_eq!(plan.asset(savings).expect("savings").core.value, value);
    }
}
