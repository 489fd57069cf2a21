//! Axum + Askama shell over the warehouse and the dashboard aggregations.

use std::collections::HashMap;
use std::sync::Arc;

use apptrack_core::{validate_application, Application, ValidationError};
use apptrack_metrics::{summary_counts, top_words, word_frequencies, Dashboard, SummaryCounts};
use apptrack_storage::{
    BlobError, BlobStore, CachedSecrets, EnvSecretStore, OptionLists, StorageConfig,
};
use apptrack_warehouse::{connect_backend, UpsertEngine, WarehouseConfig, WarehouseError};
use askama::Template;
use axum::{
    extract::{FromRequestParts, Path as AxumPath, State},
    http::{header, request::Parts, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "apptrack-web";

/// Secret holding a JSON object of `username -> password`.
pub const CREDENTIALS_SECRET: &str = "VALID_USERNAME_PASSWORD_PAIRS";

const RECENT_ROWS: usize = 15;
const TOP_WORDS: usize = 25;

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub port: u16,
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("APPTRACK_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub warehouse: Arc<UpsertEngine>,
    pub options: Arc<OptionLists>,
    pub secrets: Arc<CachedSecrets>,
}

impl AppState {
    pub fn new(warehouse: UpsertEngine, options: OptionLists, secrets: CachedSecrets) -> Self {
        Self {
            warehouse: Arc::new(warehouse),
            options: Arc::new(options),
            secrets: Arc::new(secrets),
        }
    }

    /// Calendar day in the warehouse timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now()
            .with_timezone(&self.warehouse.timezone())
            .date_naive()
    }
}

#[derive(Debug, Error)]
pub enum WebError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unauthorized")]
    Unauthorized,
    #[error("upsert of {application_id} failed")]
    Upsert {
        application_id: String,
        errors: Vec<String>,
    },
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
    #[error(transparent)]
    Storage(#[from] BlobError),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            WebError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                json!({"error": {"code": "NOT_FOUND", "message": what}}),
            ),
            WebError::Validation(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({"error": {"code": "VALIDATION_ERROR", "message": err.to_string(), "issues": err.issues}}),
            ),
            WebError::Unauthorized => {
                let body = Json(json!({"error": {"code": "UNAUTHORIZED", "message": "valid credentials required"}}));
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Basic realm=\"apptrack\"")],
                    body,
                )
                    .into_response();
            }
            WebError::Upsert { application_id, errors } => {
                error!(application_id = %application_id, ?errors, "upsert reported errors");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": {"code": "UPSERT_FAILED", "message": self.to_string(), "details": errors}}),
                )
            }
            WebError::Warehouse(err) => {
                error!("warehouse error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": {"code": "WAREHOUSE_ERROR", "message": err.to_string()}}),
                )
            }
            WebError::Storage(err) => {
                error!("storage error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": {"code": "STORAGE_ERROR", "message": err.to_string()}}),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// A caller that presented a known username/password pair over HTTP basic auth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = WebError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let (username, password) = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_basic_auth)
            .ok_or(WebError::Unauthorized)?;

        let pairs: HashMap<String, String> = match state.secrets.get_json(CREDENTIALS_SECRET).await {
            Ok(pairs) => pairs,
            Err(err) => {
                warn!("credential lookup failed: {err}");
                return Err(WebError::Unauthorized);
            }
        };
        match pairs.get(&username) {
            Some(expected) if *expected == password => Ok(AuthenticatedUser(username)),
            _ => {
                warn!(username = %username, "rejected credentials");
                Err(WebError::Unauthorized)
            }
        }
    }
}

/// `Basic dXNlcjpwYXNz` → `("user", "pass")`.
pub fn parse_basic_auth(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?.trim();
    let decoded = STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

#[derive(Debug, Clone)]
struct WordRow {
    word: String,
    count: usize,
}

#[derive(Debug, Clone)]
struct RecentRow {
    application_id: String,
    application_date: NaiveDate,
    company_name: String,
    job_title: String,
    status: &'static str,
}

impl RecentRow {
    fn from_application(app: &Application) -> Self {
        let status = if app.offer {
            "Offer"
        } else if app.rejection {
            "Rejected"
        } else if app.technical_screen {
            "Technical Screen"
        } else if app.hiring_manager_screen {
            "Hiring Manager Screen"
        } else if app.recruiter_screen {
            "Recruiter Screen"
        } else {
            "Applied"
        };
        Self {
            application_id: app.application_id.clone(),
            application_date: app.application_date,
            company_name: app.company_name.clone(),
            job_title: app.job_title.clone(),
            status,
        }
    }
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    summary: SummaryCounts,
    top_words: Vec<WordRow>,
    recent: Vec<RecentRow>,
}

#[derive(Debug, Deserialize)]
struct OptionValue {
    value: String,
}

#[derive(Debug, Serialize)]
struct OptionAdded {
    value: String,
    added: bool,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route(
            "/api/applications",
            get(list_applications_handler).post(submit_application_handler),
        )
        .route("/api/applications/next-id", get(next_id_handler))
        .route(
            "/api/applications/{id}",
            get(get_application_handler).delete(delete_application_handler),
        )
        .route("/api/dashboard", get(dashboard_handler))
        .route("/api/options", get(options_handler))
        .route("/api/options/core-skills", post(add_core_skill_handler))
        .route("/api/options/application-sources", post(add_application_source_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, config: &WebConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Builds the state from environment configuration, verifying the main table first.
pub async fn state_from_env() -> anyhow::Result<AppState> {
    let warehouse_config = WarehouseConfig::from_env();
    let backend = connect_backend(&warehouse_config).await?;
    let warehouse = UpsertEngine::new(backend, &warehouse_config);
    warehouse.ensure_table().await?;

    let storage = StorageConfig::from_env();
    let options = OptionLists::new(BlobStore::from_config(&storage));
    Ok(AppState::new(warehouse, options, CachedSecrets::new(EnvSecretStore)))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let state = state_from_env().await?;
    serve(state, &WebConfig::from_env()).await
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.warehouse.fetch_applications().await {
        Ok(apps) => {
            let words = top_words(&word_frequencies(&apps), TOP_WORDS);
            render_html(DashboardTemplate {
                summary: summary_counts(&apps),
                top_words: words
                    .into_iter()
                    .map(|(word, count)| WordRow { word, count })
                    .collect(),
                recent: apps.iter().take(RECENT_ROWS).map(RecentRow::from_application).collect(),
            })
        }
        Err(err) => {
            error!("loading applications for the dashboard failed: {err}");
            server_error(err.into())
        }
    }
}

async fn list_applications_handler(State(state): State<Arc<AppState>>) -> Result<Response, WebError> {
    Ok(Json(state.warehouse.fetch_all().await?).into_response())
}

async fn get_application_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Response, WebError> {
    match state.warehouse.fetch_one(&id).await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Err(WebError::NotFound(format!("application {id}"))),
    }
}

async fn next_id_handler(State(state): State<Arc<AppState>>) -> Result<Response, WebError> {
    let next = state.warehouse.next_application_id().await?;
    Ok(Json(json!({"application_id": next})).into_response())
}

async fn submit_application_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(payload): Json<Value>,
) -> Result<Response, WebError> {
    let application = validate_application(&payload, state.today())?;
    let outcome = state.warehouse.upsert(&application).await?;
    if !outcome.is_ok() {
        return Err(WebError::Upsert {
            application_id: outcome.application_id,
            errors: outcome.errors,
        });
    }
    info!(user = %user, application_id = %outcome.application_id, "application saved");
    Ok(Json(outcome).into_response())
}

async fn delete_application_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user): AuthenticatedUser,
    AxumPath(id): AxumPath<String>,
) -> Result<Response, WebError> {
    let outcome = state.warehouse.delete_by_id(&id).await?;
    info!(user = %user, application_id = %id, rows = outcome.rows_deleted, "application deleted");
    Ok(Json(outcome).into_response())
}

async fn dashboard_handler(State(state): State<Arc<AppState>>) -> Result<Response, WebError> {
    let apps = state.warehouse.fetch_applications().await?;
    Ok(Json(Dashboard::compute(&apps, state.today())).into_response())
}

async fn options_handler(State(state): State<Arc<AppState>>) -> Result<Response, WebError> {
    Ok(Json(state.options.get().await?).into_response())
}

async fn add_core_skill_handler(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
    Json(body): Json<OptionValue>,
) -> Result<Response, WebError> {
    let added = state.options.add_core_skill(&body.value).await?;
    Ok(Json(OptionAdded { value: body.value, added }).into_response())
}

async fn add_application_source_handler(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
    Json(body): Json<OptionValue>,
) -> Result<Response, WebError> {
    let added = state.options.add_application_source(&body.value).await?;
    Ok(Json(OptionAdded { value: body.value, added }).into_response())
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            error!("template rendering failed: {err}");
            server_error(anyhow::anyhow!(err.to_string()))
        }
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use apptrack_storage::StaticSecretStore;
    use apptrack_warehouse::{BackendOp, MemoryWarehouse};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state() -> (AppState, TempDir) {
        let bucket = tempfile::tempdir().expect("tempdir");
        let warehouse = UpsertEngine::new(Arc::new(MemoryWarehouse::new()), &WarehouseConfig::default());
        let options = OptionLists::new(BlobStore::new(bucket.path()));
        let secrets = CachedSecrets::new(StaticSecretStore::new([(
            CREDENTIALS_SECRET.to_string(),
            r#"{"jobseeker":"s3cret"}"#.to_string(),
        )]));
        (AppState::new(warehouse, options, secrets), bucket)
    }

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
    }

    fn post_json(uri: &str, body: Value, auth: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn submission(id: &str) -> Value {
        json!({
            "application_id": id,
            "application_date": "2026-02-10",
            "company_name": "Acme",
            "job_title": "Data Scientist",
            "requirements": "Python and SQL with strong data skills",
            "core_skills": ["python", "sql"],
            "recruiter_screen": true
        })
    }

    #[test]
    fn basic_auth_header_parsing() {
        assert_eq!(
            parse_basic_auth(&basic("a", "b:c")),
            Some(("a".to_string(), "b:c".to_string()))
        );
        assert_eq!(parse_basic_auth("Bearer abc"), None);
        assert_eq!(parse_basic_auth("Basic !!!"), None);
    }

    #[tokio::test]
    async fn dashboard_page_renders_counters() {
        let (state, _bucket) = test_state();
        let router = app(state);
        router
            .clone()
            .oneshot(post_json("/api/applications", submission("1"), Some(basic("jobseeker", "s3cret"))))
            .await
            .unwrap();

        let resp = router.oneshot(get_req("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("Job Application Tracker"));
        assert!(text.contains("Recruiter Screen"));
        assert!(text.contains("python (1)"));
    }

    #[tokio::test]
    async fn dashboard_page_reports_warehouse_failures() {
        let bucket = tempfile::tempdir().expect("tempdir");
        let memory = Arc::new(MemoryWarehouse::new());
        memory.fail_on(BackendOp::CheckTable).await;
        let state = AppState::new(
            UpsertEngine::new(memory.clone(), &WarehouseConfig::default()),
            OptionLists::new(BlobStore::new(bucket.path())),
            CachedSecrets::new(StaticSecretStore::default()),
        );

        let resp = app(state).oneshot(get_req("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("Server error:"), "{text}");
        assert!(text.contains("check_table"), "{text}");
    }

    #[tokio::test]
    async fn mutations_require_known_credentials() {
        let (state, _bucket) = test_state();
        let router = app(state);

        let anonymous = router
            .clone()
            .oneshot(post_json("/api/applications", submission("1"), None))
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
        assert!(anonymous.headers().contains_key(header::WWW_AUTHENTICATE));

        let wrong = router
            .clone()
            .oneshot(post_json("/api/applications", submission("1"), Some(basic("jobseeker", "nope"))))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let delete = router
            .oneshot(Request::builder().method("DELETE").uri("/api/applications/1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(delete.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn submit_fetch_and_delete_round_trip() {
        let (state, _bucket) = test_state();
        let router = app(state);
        let auth = Some(basic("jobseeker", "s3cret"));

        let mut payload = submission("x");
        payload["application_id"] = json!(5);
        let saved = router
            .clone()
            .oneshot(post_json("/api/applications", payload, auth.clone()))
            .await
            .unwrap();
        assert_eq!(saved.status(), StatusCode::OK);
        assert_eq!(json_body(saved).await["application_id"], "5");

        let fetched = router.clone().oneshot(get_req("/api/applications/5")).await.unwrap();
        assert_eq!(fetched.status(), StatusCode::OK);
        let record = json_body(fetched).await;
        assert_eq!(record["company_name"], "Acme");
        assert_eq!(record["core_skills"], json!(["python", "sql"]));
        assert!(record["created_at"].is_string());

        let next = router.clone().oneshot(get_req("/api/applications/next-id")).await.unwrap();
        assert_eq!(json_body(next).await["application_id"], "6");

        let deleted = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/applications/5")
                    .header(header::AUTHORIZATION, basic("jobseeker", "s3cret"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(deleted).await["rows_deleted"], 1);

        let missing = router.oneshot(get_req("/api/applications/5")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_submissions_list_every_bad_field() {
        let (state, _bucket) = test_state();
        let router = app(state);
        let payload = json!({"application_id": "1", "offer": "yes", "offer_date": "02/10/2026"});

        let resp = router
            .clone()
            .oneshot(post_json("/api/applications", payload, Some(basic("jobseeker", "s3cret"))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(resp).await;
        let fields: Vec<&str> = body["error"]["issues"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["field"].as_str().unwrap())
            .collect();
        for field in ["company_name", "job_title", "offer", "offer_date"] {
            assert!(fields.contains(&field), "missing issue for {field}");
        }

        let listing = router.oneshot(get_req("/api/applications")).await.unwrap();
        assert_eq!(json_body(listing).await, json!([]));
    }

    #[tokio::test]
    async fn dashboard_json_reflects_saved_records() {
        let (state, _bucket) = test_state();
        let router = app(state);
        router
            .clone()
            .oneshot(post_json("/api/applications", submission("1"), Some(basic("jobseeker", "s3cret"))))
            .await
            .unwrap();

        let resp = router.oneshot(get_req("/api/dashboard")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["summary"]["applications_created"], 1);
        assert_eq!(body["summary"]["responses"], 1);
        assert_eq!(body["sankey"]["edges"].as_array().unwrap().len(), 18);
        assert_eq!(body["word_frequencies"]["python"], 1);
        assert!(body["word_frequencies"].get("strong").is_none());
    }

    #[tokio::test]
    async fn options_are_seeded_and_extendable() {
        let (state, _bucket) = test_state();
        let router = app(state);

        let options = json_body(router.clone().oneshot(get_req("/api/options")).await.unwrap()).await;
        assert!(options["application_sources"]
            .as_array()
            .unwrap()
            .contains(&json!("LinkedIn")));

        let added = router
            .clone()
            .oneshot(post_json(
                "/api/options/core-skills",
                json!({"value": "polars"}),
                Some(basic("jobseeker", "s3cret")),
            ))
            .await
            .unwrap();
        assert_eq!(json_body(added).await["added"], true);

        let options = json_body(router.oneshot(get_req("/api/options")).await.unwrap()).await;
        assert!(options["core_skills"].as_array().unwrap().contains(&json!("polars")));
    }
}
