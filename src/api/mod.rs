use axum::{
    Router,
    extract::Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::core::{
    FilingStatus, ObjectId, ObjectKind, Owner, Plan, Series, TaxTables, Year, load_plan,
    plan_from_value, plan_to_value, save_plan,
};

static TRACING_INIT: Once = Once::new();

/// Install the fmt subscriber once. `RUST_LOG` is honoured, with
/// `nestegg=info` added on top.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let mut filter = EnvFilter::from_default_env();
        if let Ok(directive) = "nestegg=info".parse() {
            filter = filter.add_directive(directive);
        }
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Household finance projection (incomes, expenses, assets and liabilities over a calendar)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Re-project a saved plan and write it back.
    Project {
        #[arg(long)]
        plan: PathBuf,
        #[arg(long, help = "Precomputed tax tables (JSON); runs cash allocation when given")]
        tax_tables: Option<PathBuf>,
        #[arg(long, help = "Where to write the projected plan; defaults to --plan")]
        out: Option<PathBuf>,
    },
    /// Serve the HTTP API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProjectRequest {
    plan: PathBuf,
    tax_tables: Option<PathBuf>,
    out: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProjectSummary {
    entities: usize,
    tax_expenses: usize,
    unfunded_people: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectPayload {
    plan: Value,
    #[serde(default)]
    tax_tables: Option<TaxTables>,
}

#[derive(Debug, Serialize)]
struct Aggregates {
    income: Series,
    expenses: Series,
    assets: Series,
    liabilities: Series,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResponse {
    plan: Value,
    aggregates: BTreeMap<String, Aggregates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filing_status: Option<BTreeMap<Year, FilingStatus>>,
    unfunded: BTreeMap<ObjectId, Series>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn validate_existing_file(path: &Path, flag: &str) -> Result<(), String> {
    if !path.is_file() {
        return Err(format!("{flag} must point to an existing file: {}", path.display()));
    }
    Ok(())
}

fn validate_output_path(path: &Path) -> Result<(), String> {
    if path.as_os_str().is_empty() {
        return Err("--out must not be empty".to_string());
    }
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => Err(format!(
            "--out directory does not exist: {}",
            dir.display()
        )),
        _ => Ok(()),
    }
}

fn validate_port(port: u16) -> Result<u16, String> {
    if port == 0 {
        return Err("--port must be > 0".to_string());
    }
    Ok(port)
}

fn build_project_request(
    plan: PathBuf,
    tax_tables: Option<PathBuf>,
    out: Option<PathBuf>,
) -> Result<ProjectRequest, String> {
    validate_existing_file(&plan, "--plan")?;
    if let Some(tables) = &tax_tables {
        validate_existing_file(tables, "--tax-tables")?;
    }
    let out = out.unwrap_or_else(|| plan.clone());
    validate_output_path(&out)?;
    Ok(ProjectRequest {
        plan,
        tax_tables,
        out,
    })
}

fn read_tax_tables(path: &Path) -> Result<TaxTables, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("cannot read tax tables {}: {e}", path.display()))?;
    serde_json::from_str(&raw).map_err(|e| format!("invalid tax tables JSON: {e}"))
}

fn project_file(request: &ProjectRequest) -> Result<ProjectSummary, String> {
    let mut plan = load_plan(&request.plan).map_err(|e| e.to_string())?;
    plan.project_all().map_err(|e| e.to_string())?;

    let mut summary = ProjectSummary {
        entities: plan.entity_ids().len(),
        tax_expenses: 0,
        unfunded_people: 0,
    };
    if let Some(path) = &request.tax_tables {
        let tables = read_tax_tables(path)?;
        let report = plan.balance_and_tax(&tables).map_err(|e| e.to_string())?;
        summary.tax_expenses = report.tax_expenses.len();
        summary.unfunded_people = report.unfunded.len();
        summary.entities = plan.entity_ids().len();
    }
    save_plan(&plan, &request.out).map_err(|e| e.to_string())?;
    Ok(summary)
}

fn aggregates_for(plan: &mut Plan, owner: Owner) -> Aggregates {
    Aggregates {
        income: plan.aggregate(ObjectKind::Income, owner),
        expenses: plan.aggregate(ObjectKind::Expense, owner),
        assets: plan.aggregate(ObjectKind::Asset, owner),
        liabilities: plan.aggregate(ObjectKind::Liability, owner),
    }
}

/// Per-adult totals keyed by name, plus the whole household.
fn plan_aggregates(plan: &mut Plan) -> BTreeMap<String, Aggregates> {
    let adults: Vec<(ObjectId, String)> = plan
        .people
        .iter()
        .filter(|person| !person.dependent)
        .map(|person| (person.id, person.name.clone()))
        .collect();
    let mut out = BTreeMap::new();
    for (id, name) in adults {
        out.insert(name, aggregates_for(plan, Owner::Person(id)));
    }
    out.insert("Household".to_string(), aggregates_for(plan, Owner::Joint));
    out
}

fn project_document(payload: ProjectPayload) -> Result<ProjectResponse, String> {
    let mut plan = plan_from_value(payload.plan).map_err(|e| e.to_string())?;
    plan.project_all().map_err(|e| e.to_string())?;

    let mut filing_status = None;
    let mut unfunded = BTreeMap::new();
    if let Some(tables) = &payload.tax_tables {
        let report = plan.balance_and_tax(tables).map_err(|e| e.to_string())?;
        filing_status = Some(report.filing_status);
        unfunded = report.unfunded;
    }
    if !unfunded.is_empty() {
        warn!(people = unfunded.len(), "allocation left unfunded shortfalls");
    }

    let aggregates = plan_aggregates(&mut plan);
    let plan = plan_to_value(&plan).map_err(|e| e.to_string())?;
    Ok(ProjectResponse {
        plan,
        aggregates,
        filing_status,
        unfunded,
    })
}

pub async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Project {
            plan,
            tax_tables,
            out,
        } => {
            let request = build_project_request(plan, tax_tables, out)?;
            let summary = project_file(&request)?;
            println!(
                "Projected {} entities into {} ({} tax expenses, {} people with shortfalls)",
                summary.entities,
                request.out.display(),
                summary.tax_expenses,
                summary.unfunded_people
            );
            Ok(())
        }
        Command::Serve { port } => {
            let port = validate_port(port)?;
            run_http_server(port)
                .await
                .map_err(|e| format!("server error: {e}"))
        }
    }
}

fn router() -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/project", post(project_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "nestegg HTTP API listening");
    axum::serve(listener, router()).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn project_handler(Json(payload): Json<ProjectPayload>) -> Response {
    match project_document(payload) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Asset, Expense, FinancialEntity, Income, category};

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_plan() -> Plan {
        let mut plan = Plan::new("Household", 2025, 3, 0.0, 0.0);
        let alex = plan.add_person("Alex", 1990, false).expect("add person");
        let id = plan.next_id(ObjectKind::Income);
        plan.insert(Income::new(
            id,
            Owner::Person(alex),
            category::EARNED,
            "Salary",
            "Salary",
            &plan.calendar,
            60_000.0,
            false,
            true,
        ))
        .expect("salary");
        let id = plan.next_id(ObjectKind::Expense);
        plan.insert(Expense::new(
            id,
            Owner::Person(alex),
            category::NECESSARY,
            "Housing",
            "Rent",
            "",
            &plan.calendar,
            20_000.0,
            false,
        ))
        .expect("rent");
        let id = plan.next_id(ObjectKind::Asset);
        let cash = plan
            .insert(Asset::new(
                id,
                Owner::Person(alex),
                category::SAVINGS,
                "Cash",
                "Cash",
                "",
                &plan.calendar,
                10_000.0,
                0.0,
                0.0,
            ))
            .expect("cash");
        plan.set_drawdown_order(alex, vec![cash]);
        plan
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[test]
    fn cli_parses_both_subcommands() {
        let cli = Cli::try_parse_from(["nestegg", "serve"]).expect("serve");
        assert!(matches!(cli.command, Command::Serve { port: 8080 }));

        let cli = Cli::try_parse_from([
            "nestegg",
            "project",
            "--plan",
            "plan.json",
            "--tax-tables",
            "taxes.json",
        ])
        .expect("project");
        match cli.command {
            Command::Project {
                plan,
                tax_tables,
                out,
            } => {
                assert_eq!(plan, PathBuf::from("plan.json"));
                assert_eq!(tax_tables, Some(PathBuf::from("taxes.json")));
                assert!(out.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn project_request_requires_existing_plan() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.json");
        let err = build_project_request(missing, None, None).expect_err("missing plan");
        assert!(err.contains("--plan"));

        let plan = dir.path().join("plan.json");
        fs::write(&plan, "{}").expect("write");
        let request = build_project_request(plan.clone(), None, None).expect("valid");
        assert_eq!(request.out, plan);

        let err = build_project_request(plan, None, Some(dir.path().join("no/such/out.json")))
            .expect_err("bad out dir");
        assert!(err.contains("--out"));
    }

    #[test]
    fn port_zero_is_rejected() {
        assert!(validate_port(0).is_err());
        assert_eq!(validate_port(9000), Ok(9000));
    }

    #[test]
    fn project_file_writes_projected_plan() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("plan.json");
        let output = dir.path().join("projected.json");
        save_plan(&sample_plan(), &input).expect("save");
        fs::write(dir.path().join("taxes.json"), "{}").expect("tables");

        let request = build_project_request(
            input,
            Some(dir.path().join("taxes.json")),
            Some(output.clone()),
        )
        .expect("request");
        let summary = project_file(&request).expect("project");
        assert_eq!(summary.unfunded_people, 0);
        assert_eq!(summary.tax_expenses, 0);

        let projected = load_plan(&output).expect("reload");
        let cash = projected
            .get_object_from_name(ObjectKind::Asset, "Cash", None)
            .expect("cash");
        // 40k surplus per year saved into cash from 2026
        assert_approx(cash.core().value.get(2026), 50_000.0);
    }

    #[test]
    fn project_document_reports_aggregates_per_adult() {
        let doc = plan_to_value(&sample_plan()).expect("encode");
        let response = project_document(ProjectPayload {
            plan: doc,
            tax_tables: None,
        })
        .expect("projected");
        assert!(response.filing_status.is_none());
        let alex = &response.aggregates["Alex"];
        assert_approx(alex.income.get(2025), 60_000.0);
        assert_approx(alex.expenses.get(2025), 20_000.0);
        assert!(response.aggregates.contains_key("Household"));
    }

    #[test]
    fn project_document_lists_missing_fields() {
        let err = project_document(ProjectPayload {
            plan: serde_json::json!({ "name": "Empty" }),
            tax_tables: None,
        })
        .expect_err("incomplete plan");
        assert!(err.contains("missing fields"));
        assert!(err.contains("cal_year"));
    }

    #[tokio::test]
    async fn health_and_fallback_return_json_without_caching() {
        let response = health_handler().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );
        assert_eq!(body_json(response).await["status"], "ok");

        let response = not_found_handler().await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "Not found");
    }

    #[tokio::test]
    async fn project_handler_maps_errors_to_bad_request() {
        let payload: ProjectPayload =
            serde_json::from_value(serde_json::json!({ "plan": [] })).expect("payload");
        let response = project_handler(Json(payload)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().is_some_and(|msg| msg.contains("JSON object")));
    }
}
