mod asset;
mod drawdown;
mod engine;
mod entity;
mod error;
mod expense;
mod finance;
mod flow;
mod generators;
mod income;
mod liability;
mod person;
mod persist;
mod plan;
mod series;
mod types;

pub use asset::{Asset, DownPaymentSource, SaleState};
pub use drawdown::{
    AllocationReport, DrawdownOutcome, FilerTable, FilingStatus, TaxCollaborator, TaxRow,
    TaxTables,
};
pub use engine::CascadeReport;
pub use entity::{
    EdgeRegistry, EntityCore, FinancialEntity, Ledger, Namespace, PairedAttributes, Posting,
    ProjectionContext, SeriesAttr, SeriesLink, ShareLink, TimeAttr, TimeLink, owner_components,
};
pub use error::{PlanError, PlanResult};
pub use expense::Expense;
pub use finance::{child_multiplier, pmt, term_months_from_payment};
pub use flow::Flow;
pub use generators::{
    AssetPurchase, CarCosts, CompanionExpense, EmployerPlan, HomeCosts, LoanSpec, PensionOptions,
    Purchase, PurchaseOutcome, car_depreciation,
};
pub use income::{Income, IncomeRole, PayrollTax, PensionParams};
pub use liability::{
    AmortizationRow, AnnualRollup, DownPayment, Liability, LoanTerms, PmiTerms, Term,
};
pub use person::{ChildCostTable, Person};
pub use persist::{
    REQUIRED_FIELDS, load_plan, missing_fields, plan_from_str, plan_from_value, plan_to_string,
    plan_to_value, save_plan,
};
pub use plan::{Entity, EventPayload, Plan, PlanEvent};
pub use series::{Factor, Pad, Series, cumulative_inflation};
pub use types::{
    Calendar, ExpenseSharePolicy, IdAllocator, ObjectId, ObjectKind, Owner, Year, category,
};
