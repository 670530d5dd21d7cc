use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info};

use super::error::{PlanError, PlanResult};
use super::plan::Plan;

/// Top-level keys a stored plan must carry.
pub const REQUIRED_FIELDS: [&str; 14] = [
    "name",
    "start_year",
    "n_years",
    "infl_rate",
    "col_rate",
    "cal_year",
    "people",
    "income",
    "expenses",
    "assets",
    "liabilities",
    "events",
    "pairs",
    "drawdown_order",
];

/// Every required key absent from `doc`, in declaration order.
pub fn missing_fields(doc: &Value) -> Vec<String> {
    REQUIRED_FIELDS
        .iter()
        .filter(|key| doc.get(**key).is_none())
        .map(|key| key.to_string())
        .collect()
}

/// Decode a plan document, reporting all missing keys at once. The id
/// allocator is rebuilt from the ids found and every series is re-indexed
/// onto the plan calendar.
pub fn plan_from_value(doc: Value) -> PlanResult<Plan> {
    if !doc.is_object() {
        return Err(PlanError::Parse("plan document must be a JSON object".to_string()));
    }
    let missing = missing_fields(&doc);
    if !missing.is_empty() {
        return Err(PlanError::MissingFields { fields: missing });
    }
    let mut plan: Plan = serde_json::from_value(doc)?;
    let calendar = plan.calendar;
    if calendar.first() != plan.start_year || calendar.len() != plan.n_years as usize + 1 {
        return Err(PlanError::InvariantViolation(format!(
            "cal_year {}..={} does not match start_year {} and n_years {}",
            calendar.first(),
            calendar.last(),
            plan.start_year,
            plan.n_years
        )));
    }
    plan.rebuild_ids();
    plan.standardize_all();
    debug!(name = %plan.name, entities = plan.entity_ids().len(), "plan decoded");
    Ok(plan)
}

pub fn plan_from_str(raw: &str) -> PlanResult<Plan> {
    let doc: Value = serde_json::from_str(raw)?;
    plan_from_value(doc)
}

/// Serialize a renumbered copy; `plan` itself keeps its ids.
pub fn plan_to_value(plan: &Plan) -> PlanResult<Value> {
    let mut copy = plan.clone();
    copy.reorder_object_ids();
    Ok(serde_json::to_value(&copy)?)
}

pub fn plan_to_string(plan: &Plan) -> PlanResult<String> {
    Ok(serde_json::to_string_pretty(&plan_to_value(plan)?)?)
}

/// Write through a sibling temp file and rename over `path`, so readers see
/// the old document or the new one, never a partial write.
pub fn save_plan(plan: &Plan, path: &Path) -> PlanResult<()> {
    let body = plan_to_string(plan)?;
    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(body.as_bytes())?;
        file.flush()?;
    }
    fs::rename(&tmp, path)?;
    info!(path = %path.display(), "plan saved");
    Ok(())
}

pub fn load_plan(path: &Path) -> PlanResult<Plan> {
    let raw = fs::read_to_string(path)?;
    let plan = plan_from_str(&raw)?;
    info!(path = %path.display(), name = %plan.name, "plan loaded");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::{SeriesAttr, SeriesLink};
    use crate::core::expense::Expense;
    use crate::core::income::Income;
    use crate::core::types::{ObjectId, ObjectKind, Owner, category};

    fn assert_approx(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual} (tol {tol})"
        );
    }

    fn sample_plan() -> (Plan, ObjectId) {
        let mut plan = Plan::new("Saved", 2025, 4, 0.02, 0.0);
        let alex = plan.add_person("Alex", 1990, false).expect("add person");
        for (name, value) in [("Side Gig", 5_000.0), ("Salary", 80_000.0)] {
            let id = plan.next_id(ObjectKind::Income);
            let income = Income::new(
                id,
                Owner::Person(alex),
                category::EARNED,
                "Salary",
                name,
                &plan.calendar,
                value,
                false,
                true,
            );
            plan.insert(income).expect("income");
        }
        let id = plan.next_id(ObjectKind::Expense);
        let dues = Expense::new(
            id,
            Owner::Person(alex),
            category::NECESSARY,
            "Work",
            "Dues",
            "",
            &plan.calendar,
            0.0,
            true,
        );
        let dues = plan.insert(dues).expect("dues");
        let salary = plan
            .get_id_from_name(ObjectKind::Income, "Salary", None)
            .expect("salary id");
        plan.link_series(
            salary,
            dues,
            SeriesLink::new(SeriesAttr::Value, SeriesAttr::Value, 0.01),
        )
        .expect("link");
        plan.project(salary).expect("project");
        (plan, salary)
    }

    #[test]
    fn save_and_load_renumber_but_keep_values() {
        let (mut plan, salary) = sample_plan();
        assert_eq!(salary, ObjectId::new(ObjectKind::Income, 2));
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("plan.json");

        save_plan(&plan, &path).expect("save");
        assert!(!dir.path().join("plan.tmp").exists());
        // the caller's plan is untouched
        assert!(plan.income(salary).is_some_and(|i| i.core.name == "Salary"));

        let mut loaded = load_plan(&path).expect("load");
        let renumbered = loaded
            .get_id_from_name(ObjectKind::Income, "Salary", None)
            .expect("salary after load");
        assert_eq!(renumbered, ObjectId::new(ObjectKind::Income, 1));
        assert!(loaded.edges_consistent());
        assert_eq!(loaded.next_id(ObjectKind::Income).seq, 3);

        let before = plan.aggregate(ObjectKind::Expense, Owner::Joint);
        let after = loaded.aggregate(ObjectKind::Expense, Owner::Joint);
        for year in loaded.calendar.years() {
            assert_approx(after.get(year), before.get(year), 1e-6);
        }
        loaded.project_all().expect("re-project");
        let dues = loaded
            .get_object_from_name(ObjectKind::Expense, "Dues", None)
            .expect("dues");
        assert_approx(dues.core().value.get(2025), 800.0, 1e-6);
    }

    #[test]
    fn every_missing_field_is_reported() {
        let err = plan_from_str(r#"{"name": "Bare", "n_years": 3}"#).expect_err("incomplete");
        match err {
            PlanError::MissingFields { fields } => {
                assert_eq!(fields.len(), REQUIRED_FIELDS.len() - 2);
                assert!(fields.contains(&"cal_year".to_string()));
                assert!(fields.contains(&"drawdown_order".to_string()));
                assert!(!fields.contains(&"name".to_string()));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn non_object_documents_are_rejected() {
        assert!(matches!(plan_from_str("[1, 2]"), Err(PlanError::Parse(_))));
        assert!(matches!(
            plan_from_str("{not json"),
            Err(PlanError::Serialization(_))
        ));
    }

    #[test]
    fn calendar_must_agree_with_start_and_length() {
        let (plan, _) = sample_plan();
        let mut doc = plan_to_value(&plan).expect("encode");
        doc["n_years"] = Value::from(9);
        assert!(matches!(
            plan_from_value(doc),
            Err(PlanError::InvariantViolation(_))
        ));
    }
}
