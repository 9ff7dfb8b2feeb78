// Expense Ledger - JSON API server
// Thin shell over the ingestion pipeline: upload, list, delete, health.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, post},
    Router,
};
use chrono::Local;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing::error;

use expense_ledger::{
    dedup_and_commit, delete_expense, get_all_expenses, import_upload, parse_date,
    setup_database, AppConfig, Category, ExpenseRecord, ExtractionGateway, ImportError,
    ImportReport, RecordSource, StoredExpense,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    gateway: Arc<ExtractionGateway>,
    upload_dir: PathBuf,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(reason: String) -> Self {
        Self {
            success: false,
            data: (),
            error: Some(reason),
        }
    }
}

/// Import result response
#[derive(Serialize)]
struct ImportResponse {
    source: String,
    rows_seen: usize,
    rows_skipped: usize,
    inserted: usize,
    duplicates_skipped: usize,
}

impl From<ImportReport> for ImportResponse {
    fn from(report: ImportReport) -> Self {
        Self {
            source: report.source.as_str().to_string(),
            rows_seen: report.rows_seen,
            rows_skipped: report.rows_skipped,
            inserted: report.inserted,
            duplicates_skipped: report.duplicates_skipped,
        }
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/upload - Import a receipt image or statement spreadsheet
async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> impl IntoResponse {
    // Pull the first "file" part out of the multipart body.
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("upload").to_string();
            match field.bytes().await {
                Ok(bytes) => {
                    upload = Some((filename, bytes.to_vec()));
                    break;
                }
                Err(e) => {
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(ApiResponse::err(format!("could not read upload: {}", e))),
                    )
                        .into_response();
                }
            }
        }
    }

    let Some((filename, bytes)) = upload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err("missing multipart field 'file'".to_string())),
        )
            .into_response();
    };

    // The pipeline blocks (sync gateway calls, sqlite); keep it off the
    // async executor.
    let state = state.clone();
    let result = tokio::task::spawn_blocking(move || {
        let mut conn = state.db.lock().unwrap();
        import_upload(
            &mut conn,
            state.gateway.as_ref(),
            &state.upload_dir,
            &filename,
            &bytes,
        )
    })
    .await;

    match result {
        Ok(Ok(report)) => (
            StatusCode::OK,
            Json(ApiResponse::ok(ImportResponse::from(report))),
        )
            .into_response(),
        Ok(Err(e)) => {
            let status = match &e {
                ImportError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            };
            (status, Json(ApiResponse::err(e.to_string()))).into_response()
        }
        Err(e) => {
            error!("import task panicked: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err("import task failed".to_string())),
            )
                .into_response()
        }
    }
}

/// Manual expense entry payload
#[derive(Deserialize)]
struct ManualExpense {
    vendor: String,
    amount: f64,
    date: String,
    currency: Option<String>,
    category: Option<String>,
    description: Option<String>,
}

/// POST /api/expenses - Record one expense by hand
async fn create_expense(
    State(state): State<AppState>,
    Json(payload): Json<ManualExpense>,
) -> impl IntoResponse {
    if payload.vendor.trim().is_empty() || payload.amount <= 0.0 {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::err(
                "vendor and a positive amount are required".to_string(),
            )),
        )
            .into_response();
    }

    let record = ExpenseRecord {
        vendor: payload.vendor.trim().to_string(),
        amount: payload.amount,
        currency: payload.currency.unwrap_or_else(|| "EUR".to_string()),
        date_incurred: parse_date(&payload.date, Local::now().date_naive()),
        category: Category::parse(payload.category.as_deref().unwrap_or("Uncategorized")),
        description: payload.description,
        source: RecordSource::Manual,
        line_items: Vec::new(),
    };

    let mut conn = state.db.lock().unwrap();
    match dedup_and_commit(&mut conn, vec![record]) {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::ok(outcome.inserted))).into_response(),
        Err(e) => {
            error!("error recording manual expense: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err("insert failed".to_string())),
            )
                .into_response()
        }
    }
}

/// GET /api/expenses - Get all expenses with their line items
async fn list_expenses(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match get_all_expenses(&conn) {
        Ok(expenses) => {
            (StatusCode::OK, Json(ApiResponse::ok(expenses))).into_response()
        }
        Err(e) => {
            error!("error listing expenses: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::ok(Vec::<StoredExpense>::new())),
            )
                .into_response()
        }
    }
}

/// DELETE /api/expenses/:id - Delete one expense (line items cascade)
async fn remove_expense(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match delete_expense(&conn, id) {
        Ok(true) => (StatusCode::OK, Json(ApiResponse::ok(id))).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::err(format!("no expense with id {}", id))),
        )
            .into_response(),
        Err(e) => {
            error!("error deleting expense {}: {}", id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err("delete failed".to_string())),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env();

    let conn = Connection::open(&config.db_path).expect("Failed to open database");
    setup_database(&conn).expect("Failed to set up database schema");
    println!("✓ Database opened: {}", config.db_path.display());

    let gateway =
        ExtractionGateway::new(config.gateway.clone()).expect("Failed to build extraction gateway");
    println!("✓ Extraction provider: {}", gateway.provider());

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        gateway: Arc::new(gateway),
        upload_dir: config.upload_dir.clone(),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/upload", post(upload))
        .route("/expenses", get(list_expenses).post(create_expense))
        .route("/expenses/:id", delete(remove_expense))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let addr = "0.0.0.0:3000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    println!();
    println!("Server running on http://localhost:3000");
    println!("  POST /api/upload    multipart import");
    println!("  GET  /api/expenses  list ledger");
    println!();

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
