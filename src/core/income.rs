use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::entity::{EntityCore, FinancialEntity, ProjectionContext, SeriesAttr, remap_id};
use super::error::PlanResult;
use super::finance::{PensionFormula, pension_accrued};
use super::flow::Flow;
use super::series::Series;
use super::types::{Calendar, ObjectId, Owner, Year};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomeRole {
    #[default]
    Standard,
    /// Takes the minimum across its pulled proportions instead of summing.
    EmployerMatch,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PensionParams {
    pub service_start_year: Year,
    pub vesting_years: u32,
    pub final_avg_years: u32,
    pub retirement_age: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contribution_expense: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equivalent_asset: Option<ObjectId>,
}

impl PensionParams {
    fn formula(&self) -> PensionFormula {
        PensionFormula {
            service_start_year: self.service_start_year,
            vesting_years: self.vesting_years,
            final_avg_years: self.final_avg_years,
            retirement_age: self.retirement_age,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayrollTax {
    pub name: String,
    pub rate: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Income {
    #[serde(flatten)]
    pub core: EntityCore,
    #[serde(flatten)]
    pub flow: Flow,
    pub taxable: bool,
    #[serde(default)]
    pub role: IncomeRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pension_params: Option<PensionParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pension: Option<Series>,
    #[serde(default)]
    pub payroll_taxes: Vec<PayrollTax>,
}

impl Income {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ObjectId,
        person: Owner,
        category: &str,
        subcategory: &str,
        name: &str,
        calendar: &Calendar,
        value: f64,
        fixed: bool,
        taxable: bool,
    ) -> Self {
        let mut core = EntityCore::new(id, person, category, subcategory, name, calendar);
        core.value = Series::constant(calendar, value);
        Self {
            core,
            flow: Flow::new(fixed, Series::constant(calendar, value)),
            taxable,
            role: IncomeRole::Standard,
            pension_params: None,
            pension: None,
            payroll_taxes: Vec::new(),
        }
    }

    pub fn with_span(mut self, start_year: Year, end_year: Year) -> Self {
        self.core.start_year = start_year;
        self.core.end_year = end_year;
        self
    }

    pub fn add_payroll_tax(&mut self, name: &str, rate: f64) {
        self.payroll_taxes.push(PayrollTax {
            name: name.to_string(),
            rate,
        });
    }

    /// Out-of-range indices are ignored.
    pub fn remove_payroll_tax(&mut self, index: usize) -> Option<PayrollTax> {
        (index < self.payroll_taxes.len()).then(|| self.payroll_taxes.remove(index))
    }

    /// Each add-on applied to the income value, for the tax collaborator.
    pub fn payroll_tax_amounts(&self) -> Vec<(String, Series)> {
        self.payroll_taxes
            .iter()
            .map(|tax| (tax.name.clone(), self.core.value.scale(tax.rate).rounded()))
            .collect()
    }

    pub fn deflated(&self, ctx: &ProjectionContext) -> Series {
        self.flow
            .deflate(&self.core.value, self.core.start_year, &ctx.infl_rate, &ctx.calendar)
    }
}

impl FinancialEntity for Income {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn standardize(&mut self, calendar: &Calendar) {
        self.core.standardize(calendar);
        self.flow.standardize(calendar);
        if let Some(pension) = self.pension.as_mut() {
            *pension = pension.standardized(calendar);
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
        if let Some(params) = &self.pension_params {
            self.pension = Some(pension_accrued(
                &self.core.value,
                &ctx.calendar,
                &params.formula(),
            ));
        }
        Ok(())
    }

    fn read_series(&self, attr: SeriesAttr) -> Option<&Series> {
        match attr {
            SeriesAttr::Value => Some(&self.core.value),
            SeriesAttr::ValueInput => Some(&self.flow.value_input),
            SeriesAttr::Pension => self.pension.as_ref(),
            _ => None,
        }
    }

    fn write_series_slot(&mut self, attr: SeriesAttr) -> Option<&mut Series> {
        match attr {
            SeriesAttr::Value => Some(&mut self.core.value),
            SeriesAttr::ValueInput => Some(&mut self.flow.value_input),
            _ => None,
        }
    }

    fn remap_ids(&mut self, map: &BTreeMap<ObjectId, ObjectId>) {
        self.core.remap_ids(map);
        if let Some(params) = self.pension_params.as_mut() {
            if let Some(id) = params.contribution_expense.as_mut() {
                remap_id(id, map);
            }
            if let Some(id) = params.equivalent_asset.as_mut() {
                remap_id(id, map);
            }
        }
    }
}
