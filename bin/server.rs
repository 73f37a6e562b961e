// SchoolHub Fee Ledger - Web Server
// REST API with Axum: ledger reads, portal config, job triggers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use schoolhub_fees::entities::{fee_item, grant, student, student_fee};
use schoolhub_fees::lock::is_locked;
use schoolhub_fees::{EnrollmentClearance, GrantRecipient, Student, StudentFee};
use schoolhub_fees::{
    audit_ledger, init_tracing, open_database, portal_for, run_backfill, run_grant_sync,
    run_recalculation, LedgerConfig, LedgerError, Role,
};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    config: Arc<LedgerConfig>,
}

impl AppState {
    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panicked handler cannot leave the connection half-written outside a transaction.
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }
}

fn error_response(err: LedgerError) -> Response {
    let status = match &err {
        LedgerError::JobInProgress { .. } => StatusCode::CONFLICT,
        LedgerError::UnknownRole(_) => StatusCode::NOT_FOUND,
        LedgerError::InvalidValue { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(status = %status, error = %err, "request failed");
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(err.to_string()),
        }),
    )
        .into_response()
}

fn not_found(message: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
    )
        .into_response()
}

fn respond<T: Serialize>(result: Result<T, LedgerError>) -> Response {
    match result {
        Ok(data) => ApiResponse::ok(data),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check, including whether a ledger job is running
async fn health_check(State(state): State<AppState>) -> Response {
    let conn = state.conn();
    respond(is_locked(&conn).map(|ledger_locked| {
        serde_json::json!({
            "status": "OK",
            "version": schoolhub_fees::VERSION,
            "ledger_locked": ledger_locked,
        })
    }))
}

/// GET /api/fees - Whole ledger
async fn get_fees(State(state): State<AppState>) -> Response {
    let conn = state.conn();
    respond(student_fee::get_all_student_fees(&conn))
}

/// Ledger rows for one student alongside the grants behind their discounts
#[derive(Serialize)]
struct StudentLedger {
    student_id: i64,
    fees: Vec<StudentFee>,
    grants: Vec<GrantRecipient>,
}

#[derive(Serialize)]
struct StudentDetail {
    student: Student,
    clearance: Option<EnrollmentClearance>,
}

/// GET /api/students - All students
async fn get_students(State(state): State<AppState>) -> Response {
    let conn = state.conn();
    respond(student::get_all_students(&conn))
}

/// GET /api/students/:id - One student with clearance
async fn get_student(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let conn = state.conn();
    match student::get_student(&conn, id) {
        Ok(Some(found)) => respond(student::get_clearance(&conn, id).map(|clearance| {
            StudentDetail {
                student: found,
                clearance,
            }
        })),
        Ok(None) => not_found(format!("Student {} not found", id)),
        Err(e) => error_response(e),
    }
}

/// GET /api/fee-items - Every fee item, active or not
async fn get_fee_items(State(state): State<AppState>) -> Response {
    let conn = state.conn();
    respond(fee_item::get_all_fee_items(&conn))
}

/// GET /api/fees/:student_id - Ledger rows and grants for one student
async fn get_student_fees(
    State(state): State<AppState>,
    Path(student_id): Path<i64>,
) -> Response {
    let conn = state.conn();
    let ledger = student_fee::get_fees_for_student(&conn, student_id).and_then(|fees| {
        Ok(StudentLedger {
            student_id,
            fees,
            grants: grant::get_grants_for_student(&conn, student_id)?,
        })
    });
    respond(ledger)
}

/// GET /api/audit - Balance invariant check
async fn get_audit(State(state): State<AppState>) -> Response {
    let conn = state.conn();
    respond(audit_ledger(&conn))
}

/// GET /api/portal/:role - Navigation for a role portal
async fn get_portal(Path(role): Path<String>) -> Response {
    respond(role.parse::<Role>().map(portal_for))
}

/// POST /api/jobs/backfill
async fn post_backfill(State(state): State<AppState>) -> Response {
    let conn = state.conn();
    respond(run_backfill(&conn, &state.config))
}

/// POST /api/jobs/recalculate
async fn post_recalculate(State(state): State<AppState>) -> Response {
    let conn = state.conn();
    respond(run_recalculation(&conn, &state.config))
}

/// POST /api/jobs/sync-grants
async fn post_sync_grants(State(state): State<AppState>) -> Response {
    let conn = state.conn();
    respond(run_grant_sync(&conn, &state.config))
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = LedgerConfig::from_env()?;
    let conn = open_database(&config.database_path)?;
    tracing::info!(path = ?config.database_path, "database opened");

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        config: Arc::new(config),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/students", get(get_students))
        .route("/students/:id", get(get_student))
        .route("/fee-items", get(get_fee_items))
        .route("/fees", get(get_fees))
        .route("/fees/:student_id", get(get_student_fees))
        .route("/audit", get(get_audit))
        .route("/portal/:role", get(get_portal))
        .route("/jobs/backfill", post(post_backfill))
        .route("/jobs/recalculate", post(post_recalculate))
        .route("/jobs/sync-grants", post(post_sync_grants))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr = std::env::var("SCHOOLHUB_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
