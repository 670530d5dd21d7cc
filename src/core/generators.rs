use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::asset::{Asset, DownPaymentSource, SaleState};
use super::entity::{SeriesAttr, SeriesLink, TimeAttr, TimeLink};
use super::error::{PlanError, PlanResult};
use super::expense::Expense;
use super::income::{Income, IncomeRole, PayrollTax, PensionParams};
use super::liability::{DownPayment, Liability, LoanTerms, PmiTerms};
use super::person::{ADULT_AGE, CHILDCARE_AND_EDUCATION, ChildCostTable, EDUCATION_START_AGE};
use super::plan::{Entity, EventPayload, Plan, PlanEvent};
use super::series::{Factor, Series};
use super::types::{ObjectId, ObjectKind, Owner, Year, category};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PensionOptions {
    pub contribution_rate: f64,
    /// Defaults to the plan start year.
    pub service_start_year: Option<Year>,
    pub vesting_years: u32,
    pub final_avg_years: u32,
    pub retirement_age: u32,
    /// Present value of the pension as a multiple of the annual benefit.
    pub asset_multiplier: f64,
}

impl Default for PensionOptions {
    fn default() -> Self {
        Self {
            contribution_rate: 0.06,
            service_start_year: None,
            vesting_years: 5,
            final_avg_years: 3,
            retirement_age: 65,
            asset_multiplier: 25.0,
        }
    }
}

/// Expense generated from an asset and kept in step with it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompanionExpense {
    /// Savings expense mirroring the asset's contribution.
    Contribution,
    Maintenance {
        rate: Factor,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cap: Option<Factor>,
    },
    PropertyTax {
        rate: Factor,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmployerPlan {
    /// Share of salary the employee contributes.
    pub contribution_rate: Factor,
    /// Highest share of salary the employer will match.
    pub match_max_rate: Factor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_cap: Option<Factor>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetPurchase {
    pub person: Owner,
    pub category: String,
    pub subcategory: String,
    pub name: String,
    #[serde(default)]
    pub tax_keyword: String,
    pub value: f64,
    pub growth_rate: Factor,
    pub start_year: Year,
    /// Expenses that stop the year before the purchase, e.g. rent.
    #[serde(default)]
    pub expenses_replaced: Vec<ObjectId>,
    /// Assets sold the year before the purchase, e.g. the old car.
    #[serde(default)]
    pub assets_replaced: Vec<ObjectId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoanSpec {
    pub category: String,
    pub subcategory: String,
    pub name: String,
    #[serde(default)]
    pub tax_keyword: String,
    /// For a new loan the principal is replaced by the purchase price.
    pub terms: LoanTerms,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmi: Option<PmiTerms>,
}

/// An asset bought now or in the future. `down_payment_sources` marks a new
/// purchase; without it the asset (and loan) are treated as already owned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    pub asset: AssetPurchase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loan: Option<LoanSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down_payment_sources: Option<Vec<DownPaymentSource>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PurchaseOutcome {
    pub asset: ObjectId,
    pub liability: Option<ObjectId>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HomeCosts {
    pub maintenance_rate: f64,
    #[serde(default)]
    pub maintenance_cap: Option<f64>,
    pub property_tax_rate: f64,
    pub insurance: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CarCosts {
    pub model_year: Year,
    pub maintenance_rate: f64,
    pub insurance: f64,
}

const CHILD_SUBCATEGORY: &str = "Child";

struct ChildSegment {
    name: String,
    tax_keyword: &'static str,
    from_age: u32,
    to_age: u32,
}

fn child_segments(column: &str) -> Vec<ChildSegment> {
    if column == CHILDCARE_AND_EDUCATION {
        return vec![
            ChildSegment {
                name: "Childcare".to_string(),
                tax_keyword: "Child or Dependent Care",
                from_age: 0,
                to_age: EDUCATION_START_AGE,
            },
            ChildSegment {
                name: "Education".to_string(),
                tax_keyword: "",
                from_age: EDUCATION_START_AGE,
                to_age: ADULT_AGE,
            },
        ];
    }
    vec![ChildSegment {
        name: column.to_string(),
        tax_keyword: "",
        from_age: 0,
        to_age: ADULT_AGE,
    }]
}

/// Yearly growth for a car: -20% in its first year, -15% through age five,
/// -10% after that.
pub fn car_depreciation(model_year: Year, start_year: Year, last_year: Year) -> Series {
    Series::from_pairs((start_year..=last_year).map(|year| {
        let age = year - model_year;
        let rate = match age {
            0 => -0.2,
            1..=5 => -0.15,
            _ => -0.1,
        };
        (year, rate)
    }))
}

fn needs_liability(loan: Option<&LoanSpec>, value: f64) -> bool {
    match loan.map(|loan| &loan.terms) {
        None => false,
        Some(LoanTerms::Existing { payment, .. }) => *payment > 0.0,
        Some(LoanTerms::New { down_payment, .. }) => match *down_payment {
            DownPayment::Amount(amount) => amount < value,
            DownPayment::Fraction(fraction) => fraction < 1.0,
        },
    }
}

impl Plan {
    fn owner_label(&self, owner: Owner) -> String {
        match owner {
            Owner::Joint => "Joint".to_string(),
            Owner::Person(id) => self
                .person(id)
                .map(|person| person.name.clone())
                .unwrap_or_else(|| id.to_string()),
        }
    }

    /// Insert `child`, feed it from `parent` through `links`, make it follow
    /// the parent's start and end years, and project it.
    fn attach(
        &mut self,
        parent: ObjectId,
        child: impl Into<Entity>,
        links: Vec<SeriesLink>,
    ) -> PlanResult<ObjectId> {
        let child = self.insert(child)?;
        for link in links {
            self.link_series(parent, child, link)?;
        }
        self.link_span(parent, child)?;
        self.project(child)?;
        Ok(child)
    }

    fn span_of(&self, id: ObjectId) -> PlanResult<(Year, Year, bool)> {
        self.entity(id)
            .map(|entity| {
                let core = entity.core();
                (core.start_year, core.end_year, core.future_event)
            })
            .ok_or(PlanError::UnknownEntity(id))
    }

    /// Give an income a defined-benefit pension: a contribution expense and a
    /// hidden asset holding the pension's capitalised value.
    pub fn add_pension(&mut self, income_id: ObjectId, options: &PensionOptions) -> PlanResult<()> {
        if self
            .income(income_id)
            .ok_or(PlanError::UnknownEntity(income_id))?
            .pension_params
            .is_some()
        {
            self.remove_pension(income_id)?;
        }
        let (start, end, _) = self.span_of(income_id)?;
        let owner = self
            .income(income_id)
            .map(|income| income.core.person)
            .ok_or(PlanError::UnknownEntity(income_id))?;
        let holder = self.owner_label(owner);
        let calendar = self.calendar;

        let params = PensionParams {
            service_start_year: options.service_start_year.unwrap_or(self.start_year),
            vesting_years: options.vesting_years,
            final_avg_years: options.final_avg_years,
            retirement_age: options.retirement_age,
            contribution_expense: None,
            equivalent_asset: None,
        };
        if let Some(income) = self.income_mut(income_id) {
            income.pension_params = Some(params);
        }
        self.project(income_id)?;

        let id = self.next_id(ObjectKind::Expense);
        let mut contribution = Expense::new(
            id,
            owner,
            category::SAVINGS,
            "Retirement",
            &format!("Pension Contribution ({holder})"),
            "Traditional",
            &calendar,
            0.0,
            true,
        )
        .with_span(start, end);
        contribution.core.editable = false;
        let contribution = self.attach(
            income_id,
            contribution,
            vec![SeriesLink::new(
                SeriesAttr::Value,
                SeriesAttr::Value,
                options.contribution_rate,
            )],
        )?;

        let id = self.next_id(ObjectKind::Asset);
        let mut equivalent = Asset::new(
            id,
            owner,
            category::INVESTMENT,
            "Retirement",
            "Pension Equivalent",
            "",
            &calendar,
            0.0,
            0.0,
            0.0,
        )
        .with_span(start, end);
        equivalent.core.editable = false;
        equivalent.core.ui_hidden = true;
        let equivalent = self.attach(
            income_id,
            equivalent,
            vec![SeriesLink::new(
                SeriesAttr::Pension,
                SeriesAttr::Value,
                options.asset_multiplier,
            )],
        )?;

        if let Some(params) = self
            .income_mut(income_id)
            .and_then(|income| income.pension_params.as_mut())
        {
            params.contribution_expense = Some(contribution);
            params.equivalent_asset = Some(equivalent);
        }
        info!(income = %income_id, "pension added");
        self.project(income_id)?;
        Ok(())
    }

    pub fn remove_pension(&mut self, income_id: ObjectId) -> PlanResult<()> {
        let params = self
            .income_mut(income_id)
            .ok_or(PlanError::UnknownEntity(income_id))?
            .pension_params
            .take();
        if let Some(income) = self.income_mut(income_id) {
            income.pension = None;
        }
        if let Some(params) = params {
            for child in [params.contribution_expense, params.equivalent_asset]
                .into_iter()
                .flatten()
            {
                self.remove_object_by_id(child)?;
            }
        }
        self.project(income_id)?;
        Ok(())
    }

    /// Share of salary paid into the pension, read from the contribution link.
    pub fn pension_contribution_rate(&self, income_id: ObjectId) -> Option<Factor> {
        let expense = self
            .income(income_id)?
            .pension_params
            .as_ref()?
            .contribution_expense?;
        self.expense(expense)?
            .core
            .paired_attr
            .series
            .get(&income_id)?
            .iter()
            .find(|link| link.source == SeriesAttr::Value && link.target == SeriesAttr::Value)
            .map(|link| link.proportion.clone())
    }

    pub fn set_pension_contribution_rate(
        &mut self,
        income_id: ObjectId,
        rate: impl Into<Factor>,
    ) -> PlanResult<()> {
        let expense = self
            .income(income_id)
            .and_then(|income| income.pension_params.as_ref())
            .and_then(|params| params.contribution_expense)
            .ok_or_else(|| {
                PlanError::InvariantViolation(format!("{income_id} has no pension contribution"))
            })?;
        let rate = rate.into();
        if let Some(links) = self
            .expense_mut(expense)
            .and_then(|expense| expense.core.paired_attr.series.get_mut(&income_id))
        {
            for link in links.iter_mut() {
                link.proportion = rate.clone();
            }
        }
        self.project(income_id)?;
        Ok(())
    }

    pub fn add_payroll_tax(&mut self, income_id: ObjectId, name: &str, rate: f64) -> PlanResult<()> {
        self.income_mut(income_id)
            .ok_or(PlanError::UnknownEntity(income_id))?
            .add_payroll_tax(name, rate);
        self.project(income_id)?;
        Ok(())
    }

    pub fn remove_payroll_tax(
        &mut self,
        income_id: ObjectId,
        index: usize,
    ) -> PlanResult<Option<PayrollTax>> {
        let removed = self
            .income_mut(income_id)
            .ok_or(PlanError::UnknownEntity(income_id))?
            .remove_payroll_tax(index);
        self.project(income_id)?;
        Ok(removed)
    }

    /// Create an expense that tracks `asset_id` for the whole time it is owned.
    pub fn add_asset_expense(
        &mut self,
        asset_id: ObjectId,
        kind: CompanionExpense,
    ) -> PlanResult<ObjectId> {
        let asset = self.asset(asset_id).ok_or(PlanError::UnknownEntity(asset_id))?;
        let owner = asset.core.person;
        let (start, end) = (asset.core.start_year, asset.core.end_year);
        let future_event = asset.core.future_event;
        let subcategory = asset.core.subcategory.clone();
        let name = asset.core.name.clone();
        let tax_keyword = asset.tax_keyword.clone();
        let calendar = self.calendar;
        let id = self.next_id(ObjectKind::Expense);

        let (expense, link) = match kind {
            CompanionExpense::Contribution => (
                Expense::new(
                    id,
                    owner,
                    category::SAVINGS,
                    &subcategory,
                    &name,
                    &tax_keyword,
                    &calendar,
                    0.0,
                    true,
                ),
                SeriesLink::new(SeriesAttr::Contribution, SeriesAttr::Value, 1.0),
            ),
            CompanionExpense::Maintenance { rate, cap } => {
                let expense = Expense::new(
                    id,
                    owner,
                    category::NECESSARY,
                    &name,
                    &format!("{name} Maintenance"),
                    "",
                    &calendar,
                    0.0,
                    true,
                );
                let mut link = SeriesLink::new(SeriesAttr::Value, SeriesAttr::Value, rate);
                // A cap of zero or less means uncapped.
                if let Some(cap) = cap.filter(|cap| match cap {
                    Factor::Constant(value) => *value > 0.0,
                    Factor::Series(series) => !series.is_all_zero(),
                }) {
                    link = link.with_cap(cap);
                }
                (expense, link)
            }
            CompanionExpense::PropertyTax { rate } => (
                Expense::new(
                    id,
                    owner,
                    category::TAX,
                    "Property",
                    "Property Tax",
                    "Property Tax",
                    &calendar,
                    0.0,
                    true,
                ),
                SeriesLink::new(SeriesAttr::Value, SeriesAttr::Value, rate),
            ),
        };
        let mut expense = expense.with_span(start, end);
        expense.core.editable = false;
        expense.core.future_event = future_event;
        self.attach(asset_id, expense, vec![link])
    }

    /// Wire a retirement account to a salary: the employee contribution, its
    /// savings expense, and an employer match paid in as secondary
    /// contribution. Returns the match income.
    pub fn wire_401k(
        &mut self,
        asset_id: ObjectId,
        income_id: ObjectId,
        employer: &EmployerPlan,
    ) -> PlanResult<ObjectId> {
        let (start, end, _) = self.span_of(asset_id)?;
        let (owner, name) = self
            .asset(asset_id)
            .map(|asset| (asset.core.person, asset.core.name.clone()))
            .ok_or(PlanError::UnknownEntity(asset_id))?;
        if self.income(income_id).is_none() {
            return Err(PlanError::UnknownEntity(income_id));
        }

        self.link_series(
            income_id,
            asset_id,
            SeriesLink::new(
                SeriesAttr::Value,
                SeriesAttr::Contribution,
                employer.contribution_rate.clone(),
            ),
        )?;
        self.project(asset_id)?;
        self.add_asset_expense(asset_id, CompanionExpense::Contribution)?;

        let id = self.next_id(ObjectKind::Income);
        let mut matched = Income::new(
            id,
            owner,
            category::EXTERNAL,
            "Employer Match",
            &name,
            &self.calendar,
            0.0,
            true,
            false,
        )
        .with_span(start, end);
        matched.role = IncomeRole::EmployerMatch;
        let mut max_link = SeriesLink::new(
            SeriesAttr::Value,
            SeriesAttr::Value,
            employer.match_max_rate.clone(),
        );
        if let Some(cap) = &employer.match_cap {
            max_link = max_link.with_cap(cap.clone());
        }
        let matched = self.attach(
            income_id,
            matched,
            vec![
                SeriesLink::new(
                    SeriesAttr::Value,
                    SeriesAttr::Value,
                    employer.contribution_rate.clone(),
                ),
                max_link,
            ],
        )?;
        self.link_series(
            matched,
            asset_id,
            SeriesLink::new(SeriesAttr::Value, SeriesAttr::SecondaryContribution, 1.0),
        )?;
        info!(asset = %asset_id, income = %income_id, "401k wired");
        self.project(income_id)?;
        Ok(matched)
    }

    /// Payment expense for a liability, plus an extra-payment expense when any
    /// extra payments are scheduled.
    pub fn add_liability_expenses(&mut self, liability_id: ObjectId) -> PlanResult<Vec<ObjectId>> {
        let liability = self
            .liability(liability_id)
            .ok_or(PlanError::UnknownEntity(liability_id))?;
        let subcategory = liability
            .core
            .paired_attr
            .series
            .keys()
            .filter(|parent| parent.kind == ObjectKind::Asset)
            .find_map(|parent| self.asset(*parent).map(|asset| asset.core.name.clone()))
            .unwrap_or_else(|| liability.core.subcategory.clone());
        let owner = liability.core.person;
        let name = liability.core.name.clone();
        let loan_category = liability.core.category.clone();
        let tax_keyword = liability.tax_keyword.clone();
        let (start, end) = (liability.core.start_year, liability.core.end_year);
        let future_event = liability.core.future_event;
        let extras = liability.has_extra_payments();
        let calendar = self.calendar;

        let id = self.next_id(ObjectKind::Expense);
        let mut payment = Expense::new(
            id,
            owner,
            category::NECESSARY,
            &subcategory,
            &name,
            &tax_keyword,
            &calendar,
            0.0,
            true,
        )
        .with_span(start, end);
        payment.core.editable = false;
        payment.core.future_event = future_event;
        let mut created = vec![self.attach(
            liability_id,
            payment,
            vec![
                SeriesLink::new(SeriesAttr::PaymentAnnual, SeriesAttr::Value, 1.0),
                SeriesLink::new(
                    SeriesAttr::InterestPaymentAnnual,
                    SeriesAttr::InterestPayment,
                    1.0,
                ),
            ],
        )?];

        if extras {
            let id = self.next_id(ObjectKind::Expense);
            let mut extra = Expense::new(
                id,
                owner,
                category::DISCRETIONARY,
                &loan_category,
                &format!("{name} (Extra Payment)"),
                "",
                &calendar,
                0.0,
                true,
            )
            .with_span(start, end);
            extra.core.editable = false;
            extra.core.future_event = future_event;
            created.push(self.attach(
                liability_id,
                extra,
                vec![SeriesLink::new(
                    SeriesAttr::ExtraPaymentAnnual,
                    SeriesAttr::Value,
                    1.0,
                )],
            )?);
        }
        Ok(created)
    }

    /// Add an asset, financed by a loan when the down payment does not cover
    /// the price. For a new purchase, replaced expenses and assets end the
    /// year before, replaced assets are sold, and the down payment is
    /// withdrawn from the sources.
    pub fn buy_asset_with_liability(&mut self, purchase: Purchase) -> PlanResult<PurchaseOutcome> {
        let Purchase {
            asset: bought,
            loan,
            down_payment_sources,
        } = purchase;
        let calendar = self.calendar;
        let future_event = bought.start_year > self.start_year;

        let id = self.next_id(ObjectKind::Asset);
        let mut asset = Asset::new(
            id,
            bought.person,
            &bought.category,
            &bought.subcategory,
            &bought.name,
            &bought.tax_keyword,
            &calendar,
            bought.value,
            bought.growth_rate.clone(),
            0.0,
        )
        .with_span(bought.start_year, calendar.last());
        asset.core.future_event = future_event;
        let asset_id = self.insert(asset)?;

        let mut liability_id = None;
        if needs_liability(loan.as_ref(), bought.value) {
            if let Some(loan) = &loan {
                let terms = match loan.terms.clone() {
                    LoanTerms::New {
                        down_payment,
                        term,
                        interest_rate,
                        ..
                    } => LoanTerms::New {
                        principal: bought.value,
                        down_payment,
                        term,
                        interest_rate,
                    },
                    existing => existing,
                };
                let id = self.next_id(ObjectKind::Liability);
                let mut liability = Liability::new(
                    id,
                    bought.person,
                    &loan.category,
                    &loan.subcategory,
                    &loan.name,
                    &loan.tax_keyword,
                    &calendar,
                    &terms,
                )?
                .with_start(bought.start_year);
                if let Some(pmi) = loan.pmi {
                    liability = liability.with_pmi(pmi);
                }
                liability.core.future_event = future_event;
                let id = self.insert(liability)?;
                self.link_series(
                    asset_id,
                    id,
                    SeriesLink::new(SeriesAttr::Value, SeriesAttr::AssetValue, 1.0),
                )?;
                self.link_time(
                    asset_id,
                    id,
                    TimeLink::new(TimeAttr::StartYear, TimeAttr::StartYear, 0),
                )?;
                if let Some(asset) = self.asset_mut(asset_id) {
                    asset.linked_liability = Some(id);
                }
                self.project(asset_id)?;
                self.add_liability_expenses(id)?;
                liability_id = Some(id);
            }
        }

        if let Some(sources) = down_payment_sources {
            let replaced_by = TimeLink::new(TimeAttr::StartYear, TimeAttr::EndYear, -1);
            for expense in &bought.expenses_replaced {
                self.link_time(asset_id, *expense, replaced_by)?;
                self.project(*expense)?;
            }
            for old in &bought.assets_replaced {
                self.link_time(asset_id, *old, replaced_by)?;
                let sold = self
                    .asset(*old)
                    .ok_or(PlanError::UnknownEntity(*old))?
                    .sold;
                if sold == SaleState::Sold {
                    self.project(*old)?;
                } else {
                    self.sell_asset(*old, bought.start_year - 1)?;
                }
            }

            let down_payment = liability_id
                .and_then(|id| self.liability(id))
                .map(|liability| liability.down_payment)
                .unwrap_or(bought.value);
            for source in &sources {
                let amount = (source.fraction * down_payment).trunc();
                self.asset_mut(source.account)
                    .ok_or(PlanError::UnknownEntity(source.account))?
                    .withdrawal(amount, bought.start_year);
                debug!(account = %source.account, amount, "down payment withdrawn");
                self.project(source.account)?;
            }
            if let Some(asset) = self.asset_mut(asset_id) {
                asset.down_payment_sources = sources;
            }
        }

        info!(asset = %asset_id, liability = ?liability_id, "asset purchased");
        Ok(PurchaseOutcome {
            asset: asset_id,
            liability: liability_id,
        })
    }

    fn add_insurance(
        &mut self,
        asset_id: ObjectId,
        subcategory: &str,
        name: &str,
        amount: f64,
        editable: bool,
    ) -> PlanResult<ObjectId> {
        let (start, end, future_event) = self.span_of(asset_id)?;
        let owner = self
            .asset(asset_id)
            .map(|asset| asset.core.person)
            .ok_or(PlanError::UnknownEntity(asset_id))?;
        let id = self.next_id(ObjectKind::Expense);
        let mut insurance = Expense::new(
            id,
            owner,
            category::NECESSARY,
            subcategory,
            name,
            "",
            &self.calendar,
            amount,
            false,
        )
        .with_span(start, end);
        insurance.core.editable = editable;
        insurance.core.future_event = future_event;
        self.attach(asset_id, insurance, Vec::new())
    }

    fn record_purchase(&mut self, label: &str, outcome: PurchaseOutcome, year: Year) {
        let sources = self
            .asset(outcome.asset)
            .map(|asset| asset.down_payment_sources.clone())
            .unwrap_or_default();
        self.events.push(PlanEvent {
            year,
            label: label.to_string(),
            payload: EventPayload::Purchase {
                asset: outcome.asset,
                liability: outcome.liability,
                sources,
            },
        });
    }

    /// Buy a home with an optional mortgage, adding maintenance, property tax
    /// and insurance expenses.
    pub fn buy_home(&mut self, mut purchase: Purchase, costs: &HomeCosts) -> PlanResult<PurchaseOutcome> {
        purchase.asset.category = category::TANGIBLE.to_string();
        purchase.asset.subcategory = "Real Estate".to_string();
        purchase.asset.name = "Home".to_string();
        purchase.asset.tax_keyword = String::new();
        if let Some(loan) = purchase.loan.as_mut() {
            loan.category = category::INSTALLMENT.to_string();
            loan.subcategory = "Mortgage".to_string();
            loan.name = "Mortgage".to_string();
            loan.tax_keyword = "Mortgage".to_string();
        }
        let year = purchase.asset.start_year;
        let new_purchase = purchase.down_payment_sources.is_some();
        let outcome = self.buy_asset_with_liability(purchase)?;

        self.add_asset_expense(
            outcome.asset,
            CompanionExpense::Maintenance {
                rate: costs.maintenance_rate.into(),
                cap: costs.maintenance_cap.map(Factor::from),
            },
        )?;
        self.add_asset_expense(
            outcome.asset,
            CompanionExpense::PropertyTax {
                rate: costs.property_tax_rate.into(),
            },
        )?;
        let home = self
            .asset(outcome.asset)
            .map(|asset| asset.core.name.clone())
            .unwrap_or_default();
        self.add_insurance(
            outcome.asset,
            &home,
            &format!("{home} Insurance"),
            costs.insurance,
            true,
        )?;
        self.project(outcome.asset)?;

        if new_purchase {
            self.record_purchase("Buy Home", outcome, year);
        }
        Ok(outcome)
    }

    /// Buy a car with an optional auto loan. The car depreciates by age and
    /// carries maintenance and insurance expenses.
    pub fn buy_car(&mut self, mut purchase: Purchase, costs: &CarCosts) -> PlanResult<PurchaseOutcome> {
        let year = purchase.asset.start_year;
        purchase.asset.category = category::TANGIBLE.to_string();
        purchase.asset.subcategory = "Automobile".to_string();
        purchase.asset.tax_keyword = String::new();
        purchase.asset.growth_rate =
            car_depreciation(costs.model_year, year, self.calendar.last()).into();
        if let Some(loan) = purchase.loan.as_mut() {
            loan.category = category::INSTALLMENT.to_string();
            loan.subcategory = "Auto Loan".to_string();
            loan.name = "Auto Loan".to_string();
            loan.tax_keyword = String::new();
        }
        let new_purchase = purchase.down_payment_sources.is_some();
        let outcome = self.buy_asset_with_liability(purchase)?;

        self.add_asset_expense(
            outcome.asset,
            CompanionExpense::Maintenance {
                rate: costs.maintenance_rate.into(),
                cap: None,
            },
        )?;
        self.add_insurance(outcome.asset, "Auto", "Auto Insurance", costs.insurance, false)?;
        self.project(outcome.asset)?;

        if new_purchase {
            self.record_purchase("Buy Car", outcome, year);
        }
        Ok(outcome)
    }

    /// Add a dependent and the household child expenses for them.
    pub fn create_child(
        &mut self,
        name: &str,
        birth_year: Year,
        costs: ChildCostTable,
    ) -> PlanResult<ObjectId> {
        let child = self.add_person(name, birth_year, true)?;
        self.create_child_expenses(child, &costs)?;
        if let Some(person) = self.people.iter_mut().find(|person| person.id == child) {
            person.child_costs = Some(costs);
        }
        if birth_year > self.start_year {
            self.events.push(PlanEvent {
                year: birth_year,
                label: format!("Have Child ({name})"),
                payload: EventPayload::Object { id: child },
            });
        }
        info!(%child, birth_year, "child added");
        Ok(child)
    }

    /// Register `child`'s costs on the joint child expenses, creating any that
    /// do not exist yet.
    pub fn create_child_expenses(&mut self, child: ObjectId, costs: &ChildCostTable) -> PlanResult<()> {
        let person = self.person(child).cloned().ok_or(PlanError::UnknownEntity(child))?;
        let calendar = self.calendar;
        for (column, per_age) in costs {
            for segment in child_segments(column) {
                let series = person.cost_by_year(per_age, segment.from_age, segment.to_age);
                match self.get_id_from_name(ObjectKind::Expense, &segment.name, Some(Owner::Joint)) {
                    Some(id) => {
                        if let Some(expense) = self.expense_mut(id) {
                            expense
                                .child_components
                                .get_or_insert_with(BTreeMap::new)
                                .insert(child, series);
                        }
                        self.project(id)?;
                    }
                    None => {
                        let id = self.next_id(ObjectKind::Expense);
                        let mut expense = Expense::new(
                            id,
                            Owner::Joint,
                            category::NECESSARY,
                            CHILD_SUBCATEGORY,
                            &segment.name,
                            segment.tax_keyword,
                            &calendar,
                            0.0,
                            false,
                        );
                        expense.child_components = Some(BTreeMap::from([(child, series)]));
                        expense.core.future_event = true;
                        self.insert(expense)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Replace `child`'s costs on existing child expenses. Columns without a
    /// matching expense are skipped.
    pub fn edit_child_expenses(&mut self, child: ObjectId, costs: &ChildCostTable) -> PlanResult<()> {
        let person = self.person(child).cloned().ok_or(PlanError::UnknownEntity(child))?;
        for (column, per_age) in costs {
            for segment in child_segments(column) {
                let Some(id) =
                    self.get_id_from_name(ObjectKind::Expense, &segment.name, Some(Owner::Joint))
                else {
                    warn!(expense = %segment.name, "missing child expense");
                    continue;
                };
                let series = person.cost_by_year(per_age, segment.from_age, segment.to_age);
                if let Some(expense) = self.expense_mut(id) {
                    expense
                        .child_components
                        .get_or_insert_with(BTreeMap::new)
                        .insert(child, series);
                }
                self.project(id)?;
            }
        }
        if let Some(person) = self.people.iter_mut().find(|person| person.id == child) {
            let table = person.child_costs.get_or_insert_with(BTreeMap::new);
            for (column, per_age) in costs {
                table.insert(column.clone(), per_age.clone());
            }
        }
        Ok(())
    }

    fn joint_expense_named(&self, name: &str) -> Option<ObjectId> {
        self.expenses
            .iter()
            .find(|expense| expense.core.name == name && expense.core.person.is_joint())
            .map(|expense| expense.core.id)
    }

    /// End each person's expense called `name` the year before `year` and
    /// replace them with one joint expense fed by their inputs. Returns the
    /// joint expense, or `None` when there is nothing to combine.
    pub fn combine_expense(&mut self, name: &str, year: Year) -> PlanResult<Option<ObjectId>> {
        if self.adults().len() < 2 {
            return Ok(None);
        }
        if let Some(previous) = self.joint_expense_named(name) {
            self.remove_object_by_id(previous)?;
        }
        let predecessors: Vec<ObjectId> = self
            .expenses
            .iter()
            .filter(|expense| expense.core.name == name && !expense.core.person.is_joint())
            .map(|expense| expense.core.id)
            .collect();
        let Some(first) = predecessors.first().and_then(|id| self.expense(*id)) else {
            return Ok(None);
        };
        let (category, subcategory, tax_keyword) = (
            first.core.category.clone(),
            first.core.subcategory.clone(),
            first.tax_keyword.clone(),
        );

        for id in &predecessors {
            if let Some(expense) = self.expense_mut(*id) {
                expense.core.end_year = year - 1;
            }
            self.project(*id)?;
        }

        let id = self.next_id(ObjectKind::Expense);
        let mut joint = Expense::new(
            id,
            Owner::Joint,
            &category,
            &subcategory,
            name,
            &tax_keyword,
            &self.calendar,
            0.0,
            false,
        );
        joint.core.start_year = year;
        joint.core.editable = false;
        let joint = self.insert(joint)?;
        for id in &predecessors {
            self.link_series(
                *id,
                joint,
                SeriesLink::new(SeriesAttr::ValueInput, SeriesAttr::ValueInput, 1.0),
            )?;
            self.link_time(
                *id,
                joint,
                TimeLink::new(TimeAttr::EndYear, TimeAttr::StartYear, 1),
            )?;
        }
        self.project(joint)?;
        debug!(name, year, %joint, "expenses combined");
        Ok(Some(joint))
    }

    pub fn combine_expenses(&mut self, names: &[&str], year: Year) -> PlanResult<Vec<ObjectId>> {
        let mut combined = Vec::new();
        for name in names {
            combined.extend(self.combine_expense(name, year)?);
        }
        if !combined.is_empty() {
            self.combine_year = Some(year);
            self.events.push(PlanEvent {
                year,
                label: "Combine Expenses".to_string(),
                payload: EventPayload::Combination {
                    names: names.iter().map(|name| name.to_string()).collect(),
                },
            });
        }
        Ok(combined)
    }

    /// Undo [`Plan::combine_expense`]: predecessors run to the end of the
    /// calendar again and the joint expense is removed.
    pub fn uncombine_expense(&mut self, name: &str) -> PlanResult<bool> {
        if self.adults().len() < 2 {
            return Ok(false);
        }
        let Some(joint) = self.joint_expense_named(name) else {
            return Ok(false);
        };
        let last = self.calendar.last();
        let predecessors: Vec<ObjectId> = self
            .pairs
            .parents_of(joint)
            .into_iter()
            .filter(|parent| parent.kind == ObjectKind::Expense)
            .collect();
        for id in predecessors {
            self.unlink(id, joint);
            if let Some(expense) = self.expense_mut(id) {
                expense.core.end_year = last;
            }
            self.project(id)?;
        }
        self.remove_object_by_id(joint)?;
        debug!(name, %joint, "expenses uncombined");
        Ok(true)
    }

    pub fn uncombine_expenses(&mut self, names: &[&str]) -> PlanResult<usize> {
        let mut restored = 0;
        for name in names {
            if self.uncombine_expense(name)? {
                restored += 1;
            }
        }
        if restored > 0 && self.joint_combinations_remaining() == 0 {
            self.combine_year = None;
        }
        Ok(restored)
    }

    fn joint_combinations_remaining(&self) -> usize {
        self.expenses
            .iter()
            .filter(|expense| {
                expense.core.person.is_joint()
                    && expense
                        .core
                        .paired_attr
                        .series
                        .keys()
                        .any(|parent| parent.kind == ObjectKind::Expense)
            })
            .count()
    }
}
