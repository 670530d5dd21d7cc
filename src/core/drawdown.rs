use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::entity::{Ledger, Posting};
use super::error::{PlanError, PlanResult};
use super::expense::Expense;
use super::plan::Plan;
use super::series::Series;
use super::types::{ObjectId, ObjectKind, Owner, Year, category};

/// Ledger changes made by one drawdown, plus whatever could not be covered.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrawdownOutcome {
    pub postings: Vec<Posting>,
    pub unfunded: f64,
}

impl DrawdownOutcome {
    pub fn touched(&self) -> Vec<ObjectId> {
        let mut out = Vec::new();
        for posting in &self.postings {
            if !out.contains(&posting.account) {
                out.push(posting.account);
            }
        }
        out
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilingStatus {
    Single,
    Joint,
    Separate,
}

/// One filer's tax figures for one year.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxRow {
    pub gross_income: f64,
    pub agi: f64,
    pub deductions: f64,
    pub federal_tax: f64,
    pub state_tax: f64,
    pub payroll_tax: f64,
    pub total_tax: f64,
}

pub type FilerTable = BTreeMap<Year, TaxRow>;

/// Per filing scenario, per filer, per year tax figures.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxTables {
    pub single: BTreeMap<Owner, FilerTable>,
    pub joint: BTreeMap<Owner, FilerTable>,
    pub separate: BTreeMap<Owner, FilerTable>,
}

impl TaxTables {
    pub fn scenario(&self, status: FilingStatus) -> &BTreeMap<Owner, FilerTable> {
        match status {
            FilingStatus::Single => &self.single,
            FilingStatus::Joint => &self.joint,
            FilingStatus::Separate => &self.separate,
        }
    }

    /// Household total for a scenario in `year`, if any filer has a row.
    fn total(&self, status: FilingStatus, year: Year) -> Option<f64> {
        let rows: Vec<&TaxRow> = self
            .scenario(status)
            .values()
            .filter_map(|table| table.get(&year))
            .collect();
        (!rows.is_empty()).then(|| rows.iter().map(|row| row.total_tax).sum())
    }
}

/// Computes per-filer tax tables for a plan. The progressive tax rules live
/// outside this crate.
pub trait TaxCollaborator {
    fn tax_tables(&self, plan: &Plan) -> PlanResult<TaxTables>;
}

/// Tables computed ahead of time.
impl TaxCollaborator for TaxTables {
    fn tax_tables(&self, _plan: &Plan) -> PlanResult<TaxTables> {
        Ok(self.clone())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AllocationReport {
    pub filing_status: BTreeMap<Year, FilingStatus>,
    pub tax_expenses: Vec<ObjectId>,
    /// Shortfalls no drawdown account could cover, per person.
    pub unfunded: BTreeMap<ObjectId, Series>,
}

const TAX_SUBCATEGORIES: [&str; 2] = ["Income", "Payroll"];

impl Plan {
    /// Post a shortfall against `person`'s drawdown accounts in order, without
    /// re-projecting them. Assets give up at most their value that year;
    /// liabilities take the remainder as a charge.
    pub(crate) fn post_drawdown(
        &mut self,
        amount: f64,
        year: Year,
        person: ObjectId,
        ledger: Ledger,
    ) -> PlanResult<DrawdownOutcome> {
        if amount >= 0.0 {
            return Err(PlanError::InvariantViolation(format!(
                "drawdown amount must be negative, got {amount}"
            )));
        }
        let accounts = self.drawdown_order.get(&person).cloned().unwrap_or_default();
        let mut remaining = -amount;
        let mut outcome = DrawdownOutcome::default();

        for account in accounts {
            if remaining <= 0.0 {
                break;
            }
            let posting = match account.kind {
                ObjectKind::Liability if self.liability(account).is_some() => Posting {
                    account,
                    year,
                    amount: remaining,
                    ledger: Ledger::Charges,
                },
                ObjectKind::Asset => {
                    let Some(asset) = self.asset(account) else {
                        continue;
                    };
                    let available = asset.core.value.get(year).max(0.0);
                    let draw = available.min(remaining);
                    if draw <= 0.0 {
                        continue;
                    }
                    let ledger = match ledger {
                        Ledger::Charges => Ledger::Transaction,
                        other => other,
                    };
                    Posting {
                        account,
                        year,
                        amount: -draw,
                        ledger,
                    }
                }
                _ => continue,
            };
            remaining -= posting.amount.abs();
            self.apply_posting(&posting);
            outcome.postings.push(posting);
        }

        outcome.unfunded = remaining.max(0.0);
        if outcome.unfunded > 0.0 {
            warn!(
                %person,
                year,
                unfunded = outcome.unfunded,
                "drawdown accounts exhausted"
            );
        }
        Ok(outcome)
    }

    /// Cover a shortfall (`amount < 0`) from `person`'s drawdown accounts and
    /// re-project every account touched.
    pub fn drawdown(
        &mut self,
        amount: f64,
        year: Year,
        person: ObjectId,
        ledger: Ledger,
    ) -> PlanResult<DrawdownOutcome> {
        let outcome = self.post_drawdown(amount, year, person, ledger)?;
        for account in outcome.touched() {
            self.project(account)?;
        }
        Ok(outcome)
    }

    /// Cheapest eligible filing status per year: `single` while unmarried,
    /// `joint` or `separate` once married.
    fn best_filing_status(&self, tables: &TaxTables) -> BTreeMap<Year, FilingStatus> {
        let mut best = BTreeMap::new();
        for year in self.calendar.years() {
            let candidates: &[FilingStatus] = if self.is_married(year) {
                &[FilingStatus::Joint, FilingStatus::Separate]
            } else {
                &[FilingStatus::Single]
            };
            let chosen = candidates
                .iter()
                .filter_map(|status| tables.total(*status, year).map(|total| (*status, total)))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((status, _)) = chosen {
                best.insert(year, status);
            }
        }
        best
    }

    /// Replace the tax expenses with ones built from the cheapest filing
    /// status, then route each adult's yearly surplus into their first
    /// drawdown account and cover each deficit by drawing down.
    pub fn balance_and_tax(&mut self, taxes: &dyn TaxCollaborator) -> PlanResult<AllocationReport> {
        self.standardize_all();
        let tables = taxes.tax_tables(self)?;

        let stale: Vec<ObjectId> = self
            .expenses
            .iter()
            .filter(|expense| {
                expense.core.category == category::TAX
                    && TAX_SUBCATEGORIES.contains(&expense.core.subcategory.as_str())
            })
            .map(|expense| expense.core.id)
            .collect();
        for id in stale {
            self.remove_object_by_id(id)?;
        }

        let mut report = AllocationReport {
            filing_status: self.best_filing_status(&tables),
            ..AllocationReport::default()
        };
        report.tax_expenses = self.materialise_taxes(&tables, &report.filing_status)?;

        for person in self.adults() {
            let unfunded = self.allocate_person(person)?;
            if !unfunded.is_all_zero() {
                report.unfunded.insert(person, unfunded);
            }
        }
        info!(
            tax_expenses = report.tax_expenses.len(),
            "allocation finished"
        );
        Ok(report)
    }

    fn materialise_taxes(
        &mut self,
        tables: &TaxTables,
        best: &BTreeMap<Year, FilingStatus>,
    ) -> PlanResult<Vec<ObjectId>> {
        type Column = (&'static str, &'static str, fn(&TaxRow) -> f64);
        const COLUMNS: [Column; 3] = [
            ("Income", "State", |row| row.state_tax),
            ("Income", "Federal", |row| row.federal_tax),
            ("Payroll", "Payroll", |row| row.payroll_tax),
        ];

        let mut per_filer: BTreeMap<Owner, [Series; 3]> = BTreeMap::new();
        for (year, status) in best {
            for (filer, table) in tables.scenario(*status) {
                let Some(row) = table.get(year) else {
                    continue;
                };
                let columns = per_filer.entry(*filer).or_default();
                for (series, (_, _, pick)) in columns.iter_mut().zip(COLUMNS) {
                    let amount = pick(row);
                    series.set(*year, if amount.is_finite() { amount.trunc() } else { 0.0 });
                }
            }
        }

        let calendar = self.calendar;
        let mut created = Vec::new();
        for (filer, columns) in per_filer {
            for (series, (subcategory, name, _)) in columns.into_iter().zip(COLUMNS) {
                let id = self.next_id(ObjectKind::Expense);
                let mut expense = Expense::new(
                    id,
                    filer,
                    category::TAX,
                    subcategory,
                    name,
                    "",
                    &calendar,
                    0.0,
                    true,
                )
                .with_series(series.standardized(&calendar));
                expense.core.editable = false;
                created.push(self.insert(expense)?);
            }
        }
        debug!(count = created.len(), "tax expenses materialised");
        Ok(created)
    }

    fn allocate_person(&mut self, person: ObjectId) -> PlanResult<Series> {
        let calendar = self.calendar;
        let accounts = self.drawdown_order.get(&person).cloned().unwrap_or_default();
        for account in &accounts {
            if let Some(asset) = self.asset_mut(*account) {
                asset.contribution = Series::zeros(&calendar);
            } else {
                continue;
            }
            self.project(*account)?;
        }

        let spending = Series::sum(
            &calendar,
            self.expenses
                .iter()
                .filter(|expense| category::SPENDING.contains(&expense.core.category.as_str()))
                .filter_map(|expense| expense.core.components.get(&person)),
        );
        let earned = Series::sum(
            &calendar,
            self.income
                .iter()
                .filter(|income| {
                    income.core.category == category::EARNED
                        && income.core.person == Owner::Person(person)
                })
                .map(|income| &income.core.value),
        );
        let surplus = earned.zip_with(&spending, |earned, spent| earned - spent);

        let mut unfunded = Series::zeros(&calendar);
        for year in calendar.years() {
            let amount = surplus.get(year);
            if amount >= 0.0 {
                let first = accounts.first().copied();
                match first.and_then(|account| self.asset_mut(account)) {
                    Some(asset) => asset.contribution.add(year, amount.trunc()),
                    None => continue,
                }
                if let Some(account) = first {
                    self.project(account)?;
                }
            } else {
                let outcome = self.drawdown(amount, year, person, Ledger::Contribution)?;
                unfunded.set(year, outcome.unfunded);
            }
        }
        Ok(unfunded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::asset::Asset;
    use crate::core::income::Income;
    use crate::core::liability::{DownPayment, Liability, LoanTerms, Term};

    fn assert_approx(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual} (tol {tol})"
        );
    }

    fn account(plan: &mut Plan, person: ObjectId, name: &str, value: f64) -> ObjectId {
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

    fn household() -> (Plan, ObjectId) {
        let mut plan = Plan::new("Test", 2025, 4, 0.0, 0.0);
        let alex = plan.add_person("Alex", 1990, false).expect("add person");
        (plan, alex)
    }

    #[test]
    fn drawdown_walks_accounts_in_order() {
        let (mut plan, alex) = household();
        let a = account(&mut plan, alex, "A", 500.0);
        let b = account(&mut plan, alex, "B", 1_000.0);
        let c = account(&mut plan, alex, "C", 1_000.0);
        plan.set_drawdown_order(alex, vec![a, b, c]);

        let outcome = plan
            .drawdown(-800.0, 2026, alex, Ledger::Transaction)
            .expect("drawdown");
        assert_eq!(outcome.touched(), vec![a, b]);
        assert_eq!(outcome.unfunded, 0.0);
        assert_eq!(plan.asset(a).expect("a").transaction.get(2026), -500.0);
        assert_eq!(plan.asset(b).expect("b").transaction.get(2026), -300.0);
        assert!(plan.asset(c).expect("c").transaction.is_all_zero());
        assert_eq!(plan.asset(a).expect("a").core.value.get(2026), 0.0);
    }

    #[test]
    fn drawdown_rejects_non_negative_amounts() {
        let (mut plan, alex) = household();
        assert!(matches!(
            plan.drawdown(0.0, 2026, alex, Ledger::Transaction),
            Err(PlanError::InvariantViolation(_))
        ));
    }

    #[test]
    fn liability_accounts_absorb_the_remainder_as_charges() {
        let (mut plan, alex) = household();
        let a = account(&mut plan, alex, "A", 100.0);
        let id = plan.next_id(ObjectKind::Liability);
        let line = Liability::new(
            id,
            Owner::Person(alex),
            "Revolving",
            "Credit Line",
            "Credit Line",
            "",
            &plan.calendar,
            &LoanTerms::New {
                principal: 0.0,
                down_payment: DownPayment::Amount(0.0),
                term: Term::Months(12),
                interest_rate: 0.0,
            },
        )
        .expect("loan");
        let line = plan.insert(line).expect("insert");
        plan.set_drawdown_order(alex, vec![a, line]);

        let outcome = plan
            .drawdown(-350.0, 2027, alex, Ledger::Transaction)
            .expect("drawdown");
        assert_eq!(outcome.unfunded, 0.0);
        let liability = plan.liability(line).expect("line");
        assert_eq!(liability.charges.get(2027), 250.0);
        assert_eq!(liability.core.value.get(2028), 250.0);
    }

    #[test]
    fn exhausted_accounts_report_the_shortfall() {
        let (mut plan, alex) = household();
        let a = account(&mut plan, alex, "A", 100.0);
        plan.set_drawdown_order(alex, vec![a]);
        let outcome = plan
            .drawdown(-250.0, 2025, alex, Ledger::Transaction)
            .expect("drawdown");
        assert_approx(outcome.unfunded, 150.0, 1e-9);
    }

    #[test]
    fn allocation_materialises_taxes_and_saves_the_surplus() {
        let (mut plan, alex) = household();
        let savings = account(&mut plan, alex, "Savings", 0.0);
        plan.set_drawdown_order(alex, vec![savings]);
        let id = plan.next_id(ObjectKind::Income);
        let job = Income::new(
            id,
            Owner::Person(alex),
            category::EARNED,
            "Salary",
            "Job",
            &plan.calendar,
            1_000.0,
            false,
            true,
        );
        plan.insert(job).expect("insert");

        let row = TaxRow {
            federal_tax: 100.0,
            state_tax: 50.0,
            payroll_tax: 25.0,
            total_tax: 175.0,
            ..TaxRow::default()
        };
        let tables = TaxTables {
            single: BTreeMap::from([(
                Owner::Person(alex),
                plan.calendar.years().map(|y| (y, row.clone())).collect(),
            )]),
            ..TaxTables::default()
        };

        let report = plan.balance_and_tax(&tables).expect("allocate");
        assert_eq!(report.tax_expenses.len(), 3);
        assert_eq!(report.filing_status.get(&2026), Some(&FilingStatus::Single));
        let contribution = &plan.asset(savings).expect("savings").contribution;
        assert_approx(contribution.get(2026), 825.0, 1e-9);

        // a second run replaces rather than duplicates the tax expenses
        plan.balance_and_tax(&tables).expect("allocate again");
        let taxes = plan
            .expenses
            .iter()
            .filter(|e| e.core.category == category::TAX)
            .count();
        assert_eq!(taxes, 3);
        assert_approx(
            plan.asset(savings).expect("savings").contribution.get(2026),
            825.0,
            1e-9,
        );
    }

    #[test]
    fn married_years_pick_the_cheaper_joint_scenario() {
        let (mut plan, alex) = household();
        let sam = plan.add_person("Sam", 1991, false).expect("add person");
        plan.get_married(2027);
        let row = |total: f64| TaxRow {
            total_tax: total,
            ..TaxRow::default()
        };
        let years = |total: f64| -> FilerTable { (2025..=2029).map(|y| (y, row(total))).collect() };
        let tables = TaxTables {
            single: BTreeMap::from([
                (Owner::Person(alex), years(10.0)),
                (Owner::Person(sam), years(10.0)),
            ]),
            joint: BTreeMap::from([(Owner::Joint, years(30.0))]),
            separate: BTreeMap::from([
                (Owner::Person(alex), years(12.0)),
                (Owner::Person(sam), years(12.0)),
            ]),
        };
        let best = plan.best_filing_status(&tables);
        assert_eq!(best[&2025], FilingStatus::Single);
        assert_eq!(best[&2028], FilingStatus::Separate);
    }
}
