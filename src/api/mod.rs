use axum::{
    Router,
    extract::Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::core::{
    FinancialProfile, MarketAssumptions, MarketPeriodSpec, RetirementModel, ReturnDistribution,
    SimulationRequest, SpendingModel, SpendingSolveConfig,
};

pub const MIN_SIMULATIONS: u32 = 100;
pub const MAX_SIMULATIONS: u32 = 50_000;
pub const MAX_YEARS: u32 = 100;
pub const DEFAULT_CONVERSION_AMOUNT: f64 = 50_000.0;

/// Which analysis a request body is run through.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AnalysisKind {
    Simulation,
    SocialSecurity,
    RothConversion,
    SustainableSpending,
}

/// Request body shared by every analysis endpoint. Unset fields fall back to
/// the model defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnalysisPayload {
    profile_name: Option<String>,
    profile: Option<FinancialProfile>,
    as_of: Option<NaiveDate>,

    years: Option<u32>,
    simulations: Option<u32>,
    seed: Option<u64>,
    assumptions: Option<MarketAssumptions>,
    market_periods: Option<MarketPeriodSpec>,
    spending_model: Option<SpendingModel>,
    return_distribution: Option<ReturnDistribution>,
    return_correlation: Option<f64>,
    effective_tax_rate: Option<f64>,
    state_tax_rate: Option<f64>,

    conversion_amount: Option<f64>,
    solver: Option<SpendingSolveConfig>,
}

#[derive(Debug)]
struct ApiRequest {
    profile_name: Option<String>,
    model: RetirementModel,
    simulation: SimulationRequest,
    conversion_amount: f64,
    solver: SpendingSolveConfig,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct AnalysisResponse<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    profile_name: Option<String>,
    as_of: NaiveDate,
    #[serde(flatten)]
    body: T,
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "nestegg HTTP API listening");
    info!("local access: http://127.0.0.1:{port}/api/analysis");

    axum::serve(listener, router()).await
}

fn router() -> Router {
    Router::new()
        .route("/api/analysis", post(analysis_handler))
        .route("/api/analysis/social-security", post(social_security_handler))
        .route("/api/analysis/roth-conversion", post(roth_conversion_handler))
        .route(
            "/api/analysis/sustainable-spending",
            post(sustainable_spending_handler),
        )
        .fallback(not_found_handler)
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn analysis_handler(Json(payload): Json<AnalysisPayload>) -> Response {
    run_blocking(AnalysisKind::Simulation, payload).await
}

async fn social_security_handler(Json(payload): Json<AnalysisPayload>) -> Response {
    run_blocking(AnalysisKind::SocialSecurity, payload).await
}

async fn roth_conversion_handler(Json(payload): Json<AnalysisPayload>) -> Response {
    run_blocking(AnalysisKind::RothConversion, payload).await
}

async fn sustainable_spending_handler(Json(payload): Json<AnalysisPayload>) -> Response {
    run_blocking(AnalysisKind::SustainableSpending, payload).await
}

async fn run_blocking(kind: AnalysisKind, payload: AnalysisPayload) -> Response {
    let outcome = tokio::task::spawn_blocking(move || {
        api_request_from_payload(payload).and_then(|request| run_analysis(kind, &request))
    })
    .await;
    match outcome {
        Ok(Ok(body)) => json_response(StatusCode::OK, body),
        Ok(Err(msg)) => error_response(StatusCode::BAD_REQUEST, &msg),
        Err(err) => {
            error!(%err, ?kind, "analysis task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Analysis failed")
        }
    }
}

/// Runs one analysis over a JSON request body and returns the response as
/// pretty-printed JSON. `conversion_amount` overrides the body's amount.
pub fn run_analysis_json(
    kind: AnalysisKind,
    json: &str,
    conversion_amount: Option<f64>,
) -> Result<String, String> {
    let mut request = api_request_from_json(json)?;
    if let Some(amount) = conversion_amount {
        request.conversion_amount = amount;
    }
    let body = run_analysis(kind, &request)?;
    serde_json::to_string_pretty(&body).map_err(|e| format!("Failed to encode response: {e}"))
}

fn run_analysis(kind: AnalysisKind, request: &ApiRequest) -> Result<serde_json::Value, String> {
    let model = &request.model;
    let body = match kind {
        AnalysisKind::Simulation => to_value(
            model
                .monte_carlo_simulation(&request.simulation)
                .map_err(|e| e.to_string())?,
        ),
        AnalysisKind::SocialSecurity => to_value(model.analyze_social_security_strategies()),
        AnalysisKind::RothConversion => to_value(
            model
                .analyze_roth_conversion(request.conversion_amount)
                .map_err(|e| e.to_string())?,
        ),
        AnalysisKind::SustainableSpending => to_value(
            model
                .solve_sustainable_spending(&request.simulation, request.solver)
                .map_err(|e| e.to_string())?,
        ),
    }?;
    to_value(AnalysisResponse {
        profile_name: request.profile_name.clone(),
        as_of: model.as_of(),
        body,
    })
}

fn to_value<T: Serialize>(body: T) -> Result<serde_json::Value, String> {
    serde_json::to_value(body).map_err(|e| format!("Failed to encode response: {e}"))
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
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

fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<AnalysisPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: AnalysisPayload) -> Result<ApiRequest, String> {
    let profile = payload
        .profile
        .ok_or_else(|| "Missing required field: profile".to_string())?;
    let mut simulation = SimulationRequest::default();

    if let Some(v) = payload.simulations {
        simulation.simulations = v;
    }
    if let Some(v) = payload.years {
        simulation.years = Some(v);
    }
    if let Some(v) = payload.seed {
        simulation.seed = v;
    }
    if let Some(v) = payload.market_periods {
        simulation.market_periods = Some(v);
    }
    if let Some(v) = payload.spending_model {
        simulation.spending_model = v;
    }
    if let Some(v) = payload.return_distribution {
        simulation.return_distribution = v;
    }
    if let Some(v) = payload.return_correlation {
        simulation.return_correlation = v;
    }
    if let Some(v) = payload.effective_tax_rate {
        simulation.effective_tax_rate = v;
    }
    if let Some(v) = payload.state_tax_rate {
        simulation.state_tax_rate = v;
    }

    if !(MIN_SIMULATIONS..=MAX_SIMULATIONS).contains(&simulation.simulations) {
        return Err(format!(
            "simulations must be between {MIN_SIMULATIONS} and {MAX_SIMULATIONS}"
        ));
    }
    if !(0.0..1.0).contains(&simulation.state_tax_rate) {
        return Err("state_tax_rate must be in [0, 1)".to_string());
    }
    if !(0.0..1.0).contains(&simulation.effective_tax_rate) {
        return Err("effective_tax_rate must be in [0, 1)".to_string());
    }

    let conversion_amount = payload
        .conversion_amount
        .unwrap_or(DEFAULT_CONVERSION_AMOUNT);
    if !conversion_amount.is_finite() || conversion_amount < 0.0 {
        return Err("conversion_amount must be finite and >= 0".to_string());
    }

    let mut model = RetirementModel::new(profile, payload.assumptions.unwrap_or_default())
        .with_state_tax_rate(simulation.state_tax_rate);
    if let Some(as_of) = payload.as_of {
        model = model.with_as_of(as_of);
    }
    model
        .profile()
        .validate(model.as_of())
        .map_err(|e| e.to_string())?;

    let horizon = simulation
        .years
        .unwrap_or_else(|| model.default_horizon_years());
    if !(1..=MAX_YEARS).contains(&horizon) {
        return Err(format!("years must be between 1 and {MAX_YEARS}, got {horizon}"));
    }

    let solver = payload.solver.unwrap_or_default();
    for (field, paths) in [
        ("solver.simulations_per_iteration", solver.simulations_per_iteration),
        ("solver.final_simulations", solver.final_simulations),
    ] {
        if !(MIN_SIMULATIONS..=MAX_SIMULATIONS).contains(&paths) {
            return Err(format!(
                "{field} must be between {MIN_SIMULATIONS} and {MAX_SIMULATIONS}"
            ));
        }
    }

    Ok(ApiRequest {
        profile_name: payload.profile_name,
        model,
        simulation,
        conversion_amount,
        solver,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_body() -> serde_json::Value {
        json!({
            "profile_name": "basic",
            "as_of": "2026-01-01",
            "profile": {
                "person1": {
                    "name": "P1",
                    "birth_date": "1960-01-01",
                    "retirement_date": "2025-01-01",
                    "social_security": 24000
                },
                "person2": {
                    "name": "P2",
                    "birth_date": "1962-01-01",
                    "retirement_date": "2027-01-01",
                    "social_security": 21600
                },
                "liquid_assets": 50000,
                "traditional_ira": 500000,
                "roth_ira": 100000,
                "annual_expenses": 60000,
                "target_annual_income": 60000
            },
            "simulations": 100,
            "years": 10
        })
    }

    fn request_from(body: serde_json::Value) -> Result<ApiRequest, String> {
        api_request_from_json(&body.to_string())
    }

    #[test]
    fn api_request_from_json_merges_onto_defaults() {
        let request = request_from(sample_body()).expect("request should build");
        assert_eq!(request.profile_name.as_deref(), Some("basic"));
        assert_eq!(request.simulation.simulations, 100);
        assert_eq!(request.simulation.years, Some(10));
        assert_eq!(request.simulation.seed, SimulationRequest::default().seed);
        assert_eq!(request.conversion_amount, DEFAULT_CONVERSION_AMOUNT);
        assert_eq!(request.model.current_year(), 2026);
        assert_eq!(request.model.assumptions(), &MarketAssumptions::default());
    }

    #[test]
    fn simulation_count_is_bounded() {
        for simulations in [0, 99, 50_001] {
            let mut body = sample_body();
            body["simulations"] = json!(simulations);
            let err = request_from(body).expect_err("out of range");
            assert!(err.contains("between 100 and 50000"), "{err}");
        }
        let mut body = sample_body();
        body["simulations"] = json!(50_000);
        assert!(request_from(body).is_ok());
    }

    #[test]
    fn horizon_is_bounded() {
        for years in [0, 101, 4_000_000_000_u32] {
            let mut body = sample_body();
            body["years"] = json!(years);
            let err = request_from(body).expect_err("out of range");
            assert!(err.contains("years must be between 1 and 100"), "{err}");
        }

        let mut body = sample_body();
        body["years"] = json!(100);
        assert!(request_from(body).is_ok());

        let mut body = sample_body();
        body["years"] = serde_json::Value::Null;
        body["profile"]["person1"]["life_expectancy"] = json!(500);
        let err = request_from(body).expect_err("default horizon too long");
        assert!(err.contains("years must be between"), "{err}");
    }

    #[test]
    fn solver_path_counts_are_bounded() {
        for field in ["simulations_per_iteration", "final_simulations"] {
            for paths in [0, 99, 4_000_000_000_u32] {
                let mut solver = serde_json::Map::new();
                solver.insert(field.to_string(), json!(paths));
                let mut body = sample_body();
                body["solver"] = serde_json::Value::Object(solver);
                let err = request_from(body).expect_err("out of range");
                assert!(err.contains(field), "{err}");
                assert!(err.contains("between 100 and 50000"), "{err}");
            }
        }

        let mut body = sample_body();
        body["solver"] = json!({"simulations_per_iteration": 200, "final_simulations": 50_000});
        let request = request_from(body).expect("bounds are inclusive");
        assert_eq!(request.solver.simulations_per_iteration, 200);
        assert_eq!(request.solver.final_simulations, 50_000);
    }

    #[test]
    fn missing_profile_is_rejected() {
        let err = request_from(json!({"simulations": 500})).expect_err("profile is required");
        assert!(err.contains("profile"), "{err}");
    }

    #[test]
    fn invalid_profile_is_rejected_at_the_boundary() {
        let mut body = sample_body();
        body["profile"]["roth_ira"] = json!(-5);
        let err = request_from(body).expect_err("negative balance");
        assert!(err.contains("roth_ira"), "{err}");
    }

    #[test]
    fn malformed_json_reports_payload_error() {
        let err = api_request_from_json("{not json").expect_err("must fail");
        assert!(err.starts_with("Invalid API JSON payload"), "{err}");
    }

    #[test]
    fn simulation_response_contains_expected_fields() {
        let request = request_from(sample_body()).expect("request should build");
        let value = run_analysis(AnalysisKind::Simulation, &request).expect("analysis runs");
        for key in [
            "profile_name",
            "as_of",
            "success_rate",
            "median_final_balance",
            "final_balance_percentiles",
            "timeline",
            "warnings",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["timeline"]["years"][0], json!(2026));
        assert_eq!(value["simulations"], json!(100));
    }

    #[test]
    fn social_security_response_is_keyed_by_person() {
        let request = request_from(sample_body()).expect("request should build");
        let value = run_analysis(AnalysisKind::SocialSecurity, &request).expect("analysis runs");
        assert!(value["person1"]["strategies"]["claim_at_70"].is_object());
        assert!(value["person2"]["strategies"]["claim_at_67"].is_object());
    }

    #[test]
    fn roth_conversion_amount_defaults_and_overrides() {
        let json = sample_body().to_string();
        let defaulted: serde_json::Value = serde_json::from_str(
            &run_analysis_json(AnalysisKind::RothConversion, &json, None).expect("analysis runs"),
        )
        .expect("valid json");
        assert_eq!(defaulted["conversion_amount"], json!(50_000.0));

        let overridden: serde_json::Value = serde_json::from_str(
            &run_analysis_json(AnalysisKind::RothConversion, &json, Some(10_000.0))
                .expect("analysis runs"),
        )
        .expect("valid json");
        assert_eq!(overridden["conversion_amount"], json!(10_000.0));
        assert_eq!(overridden["filing_status"], json!("married_filing_jointly"));
    }

    #[test]
    fn negative_conversion_amount_is_rejected() {
        let mut body = sample_body();
        body["conversion_amount"] = json!(-1.0);
        assert!(request_from(body).is_err());
    }

    #[tokio::test]
    async fn handlers_map_errors_to_bad_request() {
        let payload: AnalysisPayload =
            serde_json::from_value(json!({"simulations": 10})).expect("payload parses");
        let response = analysis_handler(Json(payload)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&header::HeaderValue::from_static("no-store"))
        );

        let payload: AnalysisPayload =
            serde_json::from_value(sample_body()).expect("payload parses");
        let response = social_security_handler(Json(payload)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
