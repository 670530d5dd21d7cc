use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::entity::{EntityCore, FinancialEntity, ProjectionContext, SeriesAttr};
use super::error::{PlanError, PlanResult};
use super::finance::{ipmt, pmt, ppmt, round_cents, term_months_from_payment};
use super::series::Series;
use super::types::{Calendar, ObjectId, Owner, Year};

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum DownPayment {
    Amount(f64),
    /// Fraction of the principal.
    Fraction(f64),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "length", rename_all = "snake_case")]
pub enum Term {
    Months(u32),
    Years(u32),
}

impl Term {
    pub fn months(self) -> u32 {
        match self {
            Term::Months(months) => months,
            Term::Years(years) => years * 12,
        }
    }
}

/// How a liability's opening balance and term are known.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoanTerms {
    New {
        principal: f64,
        down_payment: DownPayment,
        term: Term,
        interest_rate: f64,
    },
    /// A loan already in repayment: the term is implied by balance and payment.
    Existing {
        present_value: f64,
        payment: f64,
        interest_rate: f64,
        #[serde(default)]
        principal: Option<f64>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PmiTerms {
    pub rate: f64,
    /// Equity proportion at which PMI stops.
    pub threshold: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AmortizationRow {
    pub year: Year,
    pub month: u32,
    pub period: u32,
    pub balance: f64,
    pub principal_payment: f64,
    pub interest_payment: f64,
    pub pmi: f64,
    pub payment: f64,
    pub extra_payment: f64,
    pub total_payment: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnualRollup {
    pub payment_annual: Series,
    pub principal_payment_annual: Series,
    pub interest_payment_annual: Series,
    pub pmi_annual: Series,
    pub extra_payment_annual: Series,
    pub total_payment_annual: Series,
}

impl AnnualRollup {
    fn standardize(&mut self, calendar: &Calendar) {
        for series in [
            &mut self.payment_annual,
            &mut self.principal_payment_annual,
            &mut self.interest_payment_annual,
            &mut self.pmi_annual,
            &mut self.extra_payment_annual,
            &mut self.total_payment_annual,
        ] {
            *series = series.standardized(calendar);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Liability {
    #[serde(flatten)]
    pub core: EntityCore,
    #[serde(default)]
    pub tax_keyword: String,
    pub interest_rate: f64,
    pub principal: f64,
    pub present_value: f64,
    #[serde(default)]
    pub down_payment: f64,
    pub term_months: u32,
    pub payment: f64,
    pub existing: bool,
    #[serde(default)]
    pub extra_payment: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmi: Option<PmiTerms>,
    #[serde(default)]
    pub asset_value: Series,
    /// Credit-line draws made by the drawdown algorithm.
    #[serde(default)]
    pub charges: Series,
    #[serde(default)]
    pub amortization_table: Vec<AmortizationRow>,
    #[serde(flatten)]
    pub annual: AnnualRollup,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payoff_balance: Option<f64>,
}

impl Liability {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ObjectId,
        person: Owner,
        category: &str,
        subcategory: &str,
        name: &str,
        tax_keyword: &str,
        calendar: &Calendar,
        terms: &LoanTerms,
    ) -> PlanResult<Self> {
        let invalid = |reason: String| PlanError::InvalidLoan {
            id: id.to_string(),
            reason,
        };
        let (principal, present_value, down_payment, term_months, payment, existing, rate) =
            match *terms {
                LoanTerms::New {
                    principal,
                    down_payment,
                    term,
                    interest_rate,
                } => {
                    let down = match down_payment {
                        DownPayment::Amount(amount) => amount,
                        DownPayment::Fraction(fraction) => fraction * principal,
                    };
                    if !(0.0..=principal).contains(&down) {
                        return Err(invalid(format!(
                            "down payment {down:.2} must be between 0 and the principal"
                        )));
                    }
                    let months = term.months();
                    if months == 0 {
                        return Err(invalid("term must be > 0".to_string()));
                    }
                    let pv = principal - down;
                    (principal, pv, down, months, pmt(pv, interest_rate, months), false, interest_rate)
                }
                LoanTerms::Existing {
                    present_value,
                    payment,
                    interest_rate,
                    principal,
                } => {
                    let months = term_months_from_payment(present_value, interest_rate, payment)
                        .map_err(|err| match err {
                            PlanError::InvalidLoan { reason, .. } => invalid(reason),
                            other => other,
                        })?;
                    (
                        principal.unwrap_or(present_value),
                        present_value,
                        0.0,
                        months,
                        payment,
                        true,
                        interest_rate,
                    )
                }
            };
        if rate < 0.0 {
            return Err(invalid("interest rate must be >= 0".to_string()));
        }

        let mut core = EntityCore::new(id, person, category, subcategory, name, calendar);
        core.value = Series::zeros(calendar);
        Ok(Self {
            core,
            tax_keyword: tax_keyword.to_string(),
            interest_rate: rate,
            principal,
            present_value,
            down_payment,
            term_months,
            payment,
            existing,
            extra_payment: vec![0.0; term_months as usize],
            pmi: None,
            asset_value: Series::zeros(calendar),
            charges: Series::zeros(calendar),
            amortization_table: Vec::new(),
            annual: AnnualRollup::default(),
            payoff_balance: None,
        })
    }

    pub fn with_pmi(mut self, pmi: PmiTerms) -> Self {
        self.pmi = Some(pmi);
        self
    }

    pub fn with_start(mut self, start_year: Year) -> Self {
        self.core.start_year = start_year;
        self
    }

    /// Monthly schedule. Rows in years at or after an early payoff are zeroed
    /// and the balance outstanding at that point is kept as `payoff_balance`.
    /// An end year on the last calendar year is not a payoff: the schedule
    /// runs through that year and rows past the calendar stay as scheduled.
    pub fn amortize(&mut self, calendar: &Calendar) {
        let rate = self.interest_rate;
        let term = self.term_months;
        self.payment = pmt(self.present_value, rate, term);
        self.extra_payment.resize(term as usize, 0.0);

        let mut rows = Vec::with_capacity(term as usize);
        let mut balance = self.present_value;
        for i in 0..term {
            let interest = round_cents(ipmt(balance, rate));
            let capped = self.payment.min(balance * (1.0 + rate / 12.0));
            let mut principal = round_cents(ppmt(balance, rate, capped));
            if i + 1 == term {
                principal = round_cents(balance);
            }
            let extra = self.extra_payment[i as usize].min((balance - principal).max(0.0));
            let year = self.core.start_year + (i / 12) as Year;
            let mut payment = principal + interest;
            let mut pmi = 0.0;
            if let Some(terms) = self.pmi {
                let at = self.core.start_year as f64 + i as f64 / 12.0;
                let home_value = self.asset_value.interpolate(at);
                let equity = if home_value > 0.0 {
                    1.0 - balance / home_value
                } else {
                    0.0
                };
                if equity < terms.threshold {
                    pmi = round_cents(terms.rate * self.principal / 12.0);
                    payment += pmi;
                }
            }
            rows.push(AmortizationRow {
                year,
                month: i % 12 + 1,
                period: i + 1,
                balance,
                principal_payment: principal,
                interest_payment: interest,
                pmi,
                payment,
                extra_payment: extra,
                total_payment: payment + extra,
            });
            balance = round_cents(balance - principal - extra).max(0.0);
        }

        self.payoff_balance = None;
        if self.core.end_year < calendar.last() {
            if let Some(first) = rows.iter().position(|row| row.year >= self.core.end_year) {
                self.payoff_balance = Some(rows[first].balance);
                for row in &mut rows[first..] {
                    *row = AmortizationRow {
                        year: row.year,
                        month: row.month,
                        period: row.period,
                        ..AmortizationRow::default()
                    };
                }
            }
        }
        self.amortization_table = rows;
    }

    fn annualize(&mut self, calendar: &Calendar) {
        let mut annual = AnnualRollup::default();
        let mut balance = Series::default();
        for row in &self.amortization_table {
            annual.payment_annual.add(row.year, row.payment);
            annual.principal_payment_annual.add(row.year, row.principal_payment);
            annual.interest_payment_annual.add(row.year, row.interest_payment);
            annual.pmi_annual.add(row.year, row.pmi);
            annual.extra_payment_annual.add(row.year, row.extra_payment);
            annual.total_payment_annual.add(row.year, row.total_payment);
            let current = balance.get(row.year);
            balance.set(row.year, current.max(row.balance));
        }
        for series in [
            &mut annual.payment_annual,
            &mut annual.principal_payment_annual,
            &mut annual.interest_payment_annual,
            &mut annual.pmi_annual,
            &mut annual.extra_payment_annual,
            &mut annual.total_payment_annual,
        ] {
            *series = series.rounded();
        }
        annual.standardize(calendar);
        self.annual = annual;

        let mut charged = 0.0;
        let balance = balance.standardized(calendar);
        self.core.value = balance.map_with_year(|year, owed| {
            charged += self.charges.get(year);
            (owed + charged).round()
        });
    }

    /// Outstanding balance attributable to `person` when the linked asset is sold.
    pub fn balance_for_sale(&self, person: ObjectId, year: Year, adults: &[ObjectId]) -> f64 {
        let owed = match self.payoff_balance {
            Some(balance) if year >= self.core.end_year => balance,
            _ => self.core.value.get(year),
        };
        match self.core.person {
            Owner::Person(owner) if owner == person => owed,
            Owner::Person(_) => 0.0,
            Owner::Joint if adults.contains(&person) => owed / adults.len() as f64,
            Owner::Joint => 0.0,
        }
    }

    pub fn has_extra_payments(&self) -> bool {
        self.extra_payment.iter().any(|extra| *extra > 0.0)
    }
}

impl FinancialEntity for Liability {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn standardize(&mut self, calendar: &Calendar) {
        self.core.standardize(calendar);
        self.asset_value = self.asset_value.standardized(calendar);
        self.charges = self.charges.standardized(calendar);
        self.annual.standardize(calendar);
    }

    fn update(&mut self, ctx: &ProjectionContext) -> PlanResult<()> {
        self.amortize(&ctx.calendar);
        self.annualize(&ctx.calendar);
        Ok(())
    }

    fn read_series(&self, attr: SeriesAttr) -> Option<&Series> {
        match attr {
            SeriesAttr::Value => Some(&self.core.value),
            SeriesAttr::AssetValue => Some(&self.asset_value),
            SeriesAttr::PaymentAnnual => Some(&self.annual.payment_annual),
            SeriesAttr::InterestPaymentAnnual => Some(&self.annual.interest_payment_annual),
            SeriesAttr::PrincipalPaymentAnnual => Some(&self.annual.principal_payment_annual),
            SeriesAttr::ExtraPaymentAnnual => Some(&self.annual.extra_payment_annual),
            SeriesAttr::TotalPaymentAnnual => Some(&self.annual.total_payment_annual),
            SeriesAttr::PmiAnnual => Some(&self.annual.pmi_annual),
            _ => None,
        }
    }

    fn write_series_slot(&mut self, attr: SeriesAttr) -> Option<&mut Series> {
        match attr {
            SeriesAttr::AssetValue => Some(&mut self.asset_value),
            _ => None,
        }
    }

    fn remap_ids(&mut self, map: &BTreeMap<ObjectId, ObjectId>) {
        self.core.remap_ids(map);
    }
}
