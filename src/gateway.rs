use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, FromRequestParts, Json, Query, State};
use axum::http::header::{self, HeaderValue};
use axum::http::request::Parts;
use axum::http::{HeaderName, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::admin::{client_ip, AdminAllowlist};
use crate::config::GatewayConfig;
use crate::drive::GraphDrive;
use crate::error::{GatewayError, GatewayResult};
use crate::folders::{join_label, FolderMap};
use crate::schedule::ScheduleStore;
use crate::select;
use crate::shul_times::{resolve_date, ShulTimes};
use crate::token::{ClientCredentials, TokenCache};

const DEFAULT_CONTENT_TYPE: &str = "application/pdf";

#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub tokens: Arc<TokenCache>,
    pub drive: Arc<GraphDrive>,
    pub folders: Arc<FolderMap>,
    pub pictures_path: Arc<str>,
    pub admins: Arc<AdminAllowlist>,
    pub schedule: Arc<ScheduleStore>,
    pub shul_times: Arc<ShulTimes>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("bais-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| format!("failed to build http client: {error}"))?;

        let tokens = TokenCache::new(
            ClientCredentials::new(http.clone(), &config),
            chrono::Duration::seconds(config.token_margin_secs),
        );
        let drive = GraphDrive::new(http.clone(), &config);
        let folders = FolderMap::new(&config.base_folder, &config.folders);
        let pictures_path = join_label(config.base_folder.trim_matches('/'), &config.pictures_folder);
        let admins = AdminAllowlist::new(&config.admin_ips);
        let schedule = ScheduleStore::new(config.schedule_csv.clone());
        let shul_times = ShulTimes::new(http, config.shul_times_url.clone(), config.upstream_timeout());

        Ok(Self {
            config: Arc::new(config),
            tokens: Arc::new(tokens),
            drive: Arc::new(drive),
            folders: Arc::new(folders),
            pictures_path: Arc::from(pictures_path),
            admins: Arc::new(admins),
            schedule: Arc::new(schedule),
            shul_times: Arc::new(shul_times),
        })
    }
}

/// Request source IP, resolved from `X-Forwarded-For` or the socket peer.
pub struct ClientIp(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(Self(client_ip(&parts.headers, peer)))
    }
}

#[derive(Debug, Deserialize)]
struct RecentFileQuery {
    folder: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenTestQuery {
    #[serde(default)]
    refresh: bool,
}

#[derive(Debug, Deserialize)]
struct DateQuery {
    date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OverrideMinchaRequest {
    date: Option<String>,
    time: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageLink {
    name: String,
    url: String,
}

/// `inline; filename="<ascii>"`, plus an RFC 6266 `filename*` carrying the
/// UTF-8 name when it is not plain ASCII.
fn content_disposition(name: &str) -> HeaderValue {
    let fallback: String = name
        .chars()
        .map(|ch| {
            if ch == '"' || ch == '\\' || ch.is_control() || !ch.is_ascii() {
                '_'
            } else {
                ch
            }
        })
        .collect();
    let mut value = format!("inline; filename=\"{fallback}\"");
    if !name.is_ascii() {
        value.push_str("; filename*=UTF-8''");
        value.push_str(&encode_ext_value(name));
    }
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("inline"))
}

fn encode_ext_value(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => encoded.push(char::from(byte)),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

async fn banner() -> &'static str {
    "Bais Yisroel gateway is alive"
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn api_root(State(state): State<GatewayState>) -> Json<Value> {
    let folders: Vec<&str> = state.folders.labels().collect();
    Json(json!({
        "service": "bais-gateway",
        "folders": folders,
        "endpoints": [
            "GET /health",
            "GET /api/token-test?refresh=<bool>",
            "GET /api/sharepoint/recent-file?folder=<label>",
            "GET /api/sharepoint/pictures",
            "GET /api/shul-times?date=<YYYY-MM-DD>",
            "GET /api/zmanim/today?date=<YYYY-MM-DD>",
            "GET /check-admin",
            "POST /api/zmanim/override-mincha"
        ]
    }))
}

async fn token_test(
    State(state): State<GatewayState>,
    Query(query): Query<TokenTestQuery>,
) -> GatewayResult<Json<Value>> {
    if query.refresh {
        state.tokens.invalidate().await;
    }
    let token = state.tokens.get_token().await?;
    Ok(Json(json!({
        "ok": true,
        "message": "Access token retrieved successfully",
        "expiresAt": token.expires_at,
    })))
}

async fn recent_file(
    State(state): State<GatewayState>,
    Query(query): Query<RecentFileQuery>,
) -> GatewayResult<Response> {
    let label = query
        .folder
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| GatewayError::validation("Missing folder query parameter"))?;
    let folder_path = state.folders.resolve(label)?;

    let token = state.tokens.get_token().await?;
    let entries = state.drive.list_all_entries(folder_path, &token).await?;
    let latest = select::most_recent_file(&entries)?;
    info!(
        folder = folder_path,
        file = %latest.name,
        modified = %latest.last_modified_at,
        "serving most recent file"
    );

    let download = state.drive.download(latest).await?;
    let content_type = download
        .content_type
        .as_deref()
        .and_then(|value| HeaderValue::from_str(value).ok())
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

    let headers: [(HeaderName, HeaderValue); 3] = [
        (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        (header::CONTENT_TYPE, content_type),
        (header::CONTENT_DISPOSITION, content_disposition(&latest.name)),
    ];
    Ok((headers, Body::from(download.bytes)).into_response())
}

async fn pictures(State(state): State<GatewayState>) -> GatewayResult<Json<Vec<ImageLink>>> {
    let token = state.tokens.get_token().await?;
    let entries = state
        .drive
        .list_all_entries(&state.pictures_path, &token)
        .await?;

    let images: Vec<ImageLink> = select::all_images(&entries)
        .into_iter()
        .filter_map(|entry| {
            entry.download_url.as_ref().map(|url| ImageLink {
                name: entry.name.clone(),
                url: url.clone(),
            })
        })
        .collect();

    if images.is_empty() {
        return Err(GatewayError::not_found("No images found"));
    }
    Ok(Json(images))
}

async fn shul_times(
    State(state): State<GatewayState>,
    Query(query): Query<DateQuery>,
) -> GatewayResult<Json<Value>> {
    let date = resolve_date(query.date.as_deref())?;
    let payload = state.shul_times.fetch(&date).await?;
    Ok(Json(payload))
}

async fn zmanim_for_date(
    State(state): State<GatewayState>,
    Query(query): Query<DateQuery>,
) -> GatewayResult<Json<Value>> {
    let date = resolve_date(query.date.as_deref())?;
    let row = state.schedule.row_for_date(&date).await?;
    Ok(Json(json!({ "status": "success", "data": [row] })))
}

async fn check_admin(
    State(state): State<GatewayState>,
    ClientIp(ip): ClientIp,
) -> Json<Value> {
    let allowed = state.admins.is_admin(ip.as_deref());
    info!(ip = ip.as_deref().unwrap_or("unknown"), allowed, "admin check");
    Json(json!({ "allowed": allowed }))
}

async fn override_mincha(
    State(state): State<GatewayState>,
    ClientIp(ip): ClientIp,
    payload: Result<Json<OverrideMinchaRequest>, JsonRejection>,
) -> GatewayResult<Json<Value>> {
    let is_admin = state.admins.is_admin(ip.as_deref());
    if !is_admin {
        warn!(ip = ip.as_deref().unwrap_or("unknown"), "refused mincha override");
    }

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::debug!("unreadable override body: {}", rejection.body_text());
            OverrideMinchaRequest::default()
        }
    };

    state
        .schedule
        .patch_mincha_time(request.date.as_deref(), request.time.as_deref(), is_admin)
        .await?;
    Ok(Json(json!({ "success": true })))
}

fn build_cors(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_headers([header::CONTENT_TYPE])
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS]),
    )
}

pub fn build_router(state: GatewayState) -> Router {
    let static_dir = state.config.static_dir.clone();
    let cors = build_cors(&state.config.cors_origins);

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/api", get(api_root))
        .route("/api/token-test", get(token_test))
        .route("/api/sharepoint/recent-file", get(recent_file))
        .route("/api/sharepoint/pictures", get(pictures))
        .route("/api/shul-times", get(shul_times))
        .route("/api/zmanim/today", get(zmanim_for_date))
        .route("/check-admin", get(check_admin))
        .route("/api/zmanim/override-mincha", post(override_mincha));

    router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router.route("/", get(banner)),
    };

    let router = router.with_state(state).layer(TraceLayer::new_for_http());
    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}
