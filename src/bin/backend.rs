#![forbid(unsafe_code)]

//! HTTP entry point for the tubestats backend.
//!
//! Thin axum façade over the library: requests are mapped through the
//! identifier extractor into the statistics client, and results/errors come
//! back as JSON envelopes. The proxy endpoint relays to a second deployment
//! of the same API instead of calling YouTube directly.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Instant,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderValue, Method, StatusCode, Uri, request::Parts},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::signal;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tubestats::config::{self, RuntimeOverrides, origin_allowed};
use tubestats::extract;
use tubestats::proxy::{ProxyClient, ProxyError};
use tubestats::youtube::StatsClient;

#[derive(Debug, Clone, Default)]
struct BackendArgs {
    port: Option<u16>,
    host: Option<String>,
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--port=") {
                parsed.port = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--host=") {
                parsed.host = Some(value.to_string());
                continue;
            }
            if let Some(value) = arg.strip_prefix("--env-file=") {
                parsed.env_file = Some(PathBuf::from(value));
                continue;
            }

            match arg.as_str() {
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a value"))?;
                    parsed.port = Some(parse_port_arg(&value)?);
                }
                "--host" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    parsed.host = Some(value);
                }
                "--env-file" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--env-file requires a value"))?;
                    parsed.env_file = Some(PathBuf::from(value));
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }
        Ok(parsed)
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

/// Shared state injected into every handler.
///
/// * `stats` is `None` when no API key is configured; the stats endpoints
///   then answer with the configuration-error envelope.
/// * `proxy` relays to the remote deployment with its own timeout.
#[derive(Clone)]
struct AppState {
    stats: Option<StatsClient>,
    proxy: ProxyClient,
    started: Instant,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
    timestamped: bool,
}

impl ApiError {
    fn bad_request(error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error,
            message: message.into(),
            timestamped: true,
        }
    }

    /// 500 raised when the API key is missing from the configuration.
    fn server_config() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: "Server configuration error",
            message: "YouTube API key not configured".into(),
            timestamped: true,
        }
    }

    /// 500 carrying the statistics client's error message.
    fn fetch_failed(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: "Failed to fetch video statistics",
            message: message.into(),
            timestamped: true,
        }
    }

    /// Catch-all for failures outside the modeled taxonomy, e.g. a panicked
    /// blocking task. This envelope carries no timestamp.
    fn unhandled(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: "Something went wrong!",
            message: message.into(),
            timestamped: false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.error,
            "message": self.message,
        });
        if self.timestamped {
            body["timestamp"] = json!(timestamp());
        }
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

fn success(data: impl serde::Serialize) -> ApiResult<Json<Value>> {
    let data = serde_json::to_value(data).map_err(|err| ApiError::unhandled(err.to_string()))?;
    Ok(Json(json!({
        "success": true,
        "data": data,
        "timestamp": timestamp(),
    })))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsQuery {
    video_id: Option<String>,
    url: Option<String>,
}

/// Resolves the query into a canonical video id. `url` wins when both are
/// present, mirroring the deployed behavior; either way the value runs
/// through the extractor, which is the identity on well-formed ids.
fn resolve_video_id(query: &StatsQuery) -> ApiResult<String> {
    let input = query
        .url
        .as_deref()
        .or(query.video_id.as_deref())
        .ok_or_else(|| {
            ApiError::bad_request(
                "Missing required parameter",
                "Please provide either 'videoId' or 'url' parameter",
            )
        })?;
    extract::video_id(input).ok_or_else(|| {
        ApiError::bad_request(
            "Invalid video identifier",
            "Could not extract valid video ID from provided URL or videoId",
        )
    })
}

/// The key check runs before parameter validation: a misconfigured server
/// reports the configuration error regardless of what was asked of it.
fn stats_client(state: &AppState) -> ApiResult<StatsClient> {
    state.stats.clone().ok_or_else(ApiError::server_config)
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "YouTube Statistics Backend API is running!",
        "status": "success",
        "timestamp": timestamp(),
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptime": state.started.elapsed().as_secs_f64(),
        "timestamp": timestamp(),
    }))
}

async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<Value>> {
    let client = stats_client(&state)?;
    let video_id = resolve_video_id(&query)?;

    let stats = tokio::task::spawn_blocking(move || client.complete_stats(&video_id))
        .await
        .map_err(|err| ApiError::unhandled(err.to_string()))?
        .map_err(|err| ApiError::fetch_failed(err.to_string()))?;

    success(stats)
}

async fn get_video_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<Value>> {
    let client = stats_client(&state)?;
    let video_id = resolve_video_id(&query)?;

    let stats = tokio::task::spawn_blocking(move || client.video_stats(&video_id))
        .await
        .map_err(|err| ApiError::unhandled(err.to_string()))?
        .map_err(|err| ApiError::fetch_failed(err.to_string()))?;

    success(stats)
}

async fn get_proxy_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Response {
    let proxy = state.proxy.clone();
    let StatsQuery { video_id, url } = query;

    let relayed = tokio::task::spawn_blocking(move || {
        proxy.relay_stats(video_id.as_deref(), url.as_deref())
    })
    .await;

    match relayed {
        Ok(Ok(body)) => {
            // The remote replies with its own envelope; unwrap its data field
            // so clients see one level of wrapping, not two.
            let data = body.get("data").cloned().unwrap_or(body);
            Json(json!({
                "success": true,
                "data": data,
                "timestamp": timestamp(),
                "source": "vercel-proxy",
            }))
            .into_response()
        }
        Ok(Err(err)) => proxy_error_response(err),
        Err(err) => ApiError::unhandled(err.to_string()).into_response(),
    }
}

fn proxy_error_response(err: ProxyError) -> Response {
    match err {
        ProxyError::RemoteStatus { status, message } => {
            let status_code =
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            (
                status_code,
                Json(json!({
                    "error": "Vercel API Error",
                    "message": message,
                    "status": status,
                    "timestamp": timestamp(),
                })),
            )
                .into_response()
        }
        ProxyError::Timeout => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({
                "error": "Request Timeout",
                "message": "The remote API did not respond in time",
                "timestamp": timestamp(),
            })),
        )
            .into_response(),
        ProxyError::Network(message) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Proxy Error",
                "message": message,
                "timestamp": timestamp(),
            })),
        )
            .into_response(),
    }
}

async fn route_fallback(uri: Uri) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Route not found",
            "path": uri.to_string(),
        })),
    )
}

fn build_router(state: AppState, allowed_origins: Vec<String>) -> Router {
    let origins = Arc::new(allowed_origins);
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                origin
                    .to_str()
                    .map(|origin| origin_allowed(origin, &origins))
                    .unwrap_or(false)
            },
        ))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/youtube/stats", get(get_stats))
        .route("/api/youtube/video-stats", get(get_video_stats))
        .route("/api/proxy/youtube/stats", get(get_proxy_stats))
        .fallback(route_fallback)
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = BackendArgs::parse()?;
    let config = config::resolve_config(RuntimeOverrides {
        port: args.port,
        host: args.host,
        env_path: args.env_file,
    })?;

    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("parsing listen host {:?}", config.host))?;

    if config.api_key.is_none() {
        eprintln!("Warning: YOUTUBE_API_KEY is not set; stats endpoints will report a configuration error");
    }

    let state = AppState {
        stats: config.api_key.clone().map(StatsClient::new),
        proxy: ProxyClient::new(&config.proxy_target),
        started: Instant::now(),
    };
    let app = build_router(state, config.allowed_origins);

    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    println!("API server listening on http://{}", addr);
    println!("Health check: http://{}/health", addr);
    println!("Stats endpoint: http://{}/api/youtube/stats", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    // Failure here only affects graceful shutdown; the process still
    // terminates when Ctrl+C fires.
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::routing::get as route_get;
    use std::time::Duration;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn query(video_id: Option<&str>, url: Option<&str>) -> StatsQuery {
        StatsQuery {
            video_id: video_id.map(str::to_string),
            url: url.map(str::to_string),
        }
    }

    fn unreachable_proxy() -> ProxyClient {
        ProxyClient::new("http://127.0.0.1:9")
    }

    fn state_without_key() -> AppState {
        AppState {
            stats: None,
            proxy: unreachable_proxy(),
            started: Instant::now(),
        }
    }

    fn state_with_api(base: &str) -> AppState {
        AppState {
            stats: Some(StatsClient::with_base_url("test-key", base)),
            proxy: unreachable_proxy(),
            started: Instant::now(),
        }
    }

    /// Serves the router on an ephemeral port and returns its base URL.
    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Mock of the YouTube Data API answering `videos.list`/`channels.list`
    /// with fixed item arrays.
    fn mock_api(video_items: Value, channel_items: Value) -> Router {
        Router::new()
            .route(
                "/videos",
                route_get(move || {
                    let items = video_items.clone();
                    async move { Json(json!({"items": items})) }
                }),
            )
            .route(
                "/channels",
                route_get(move || {
                    let items = channel_items.clone();
                    async move { Json(json!({"items": items})) }
                }),
            )
    }

    fn sample_video_item() -> Value {
        json!({
            "snippet": {
                "title": "Never Gonna Give You Up",
                "channelId": "UCuAXFkgsw1L7xaCfnd5JJOw",
                "channelTitle": "Rick Astley",
                "publishedAt": "2009-10-25T06:57:33Z",
                "description": "The official video.",
                "thumbnails": {
                    "default": {"url": "https://i.ytimg.com/vi/x/default.jpg"},
                    "high": {"url": "https://i.ytimg.com/vi/x/hqdefault.jpg"}
                }
            },
            "statistics": {
                "viewCount": "1000000",
                "likeCount": "50000",
                "commentCount": "1234"
            }
        })
    }

    fn sample_channel_item() -> Value {
        json!({
            "statistics": {
                "subscriberCount": "4000000",
                "videoCount": "120",
                "viewCount": "900000000"
            }
        })
    }

    #[test]
    fn backend_args_empty() {
        let args = BackendArgs::from_iter(Vec::new()).unwrap();
        assert_eq!(args.port, None);
        assert_eq!(args.host, None);
        assert_eq!(args.env_file, None);
    }

    #[test]
    fn backend_args_split_and_joined_forms() {
        let args = BackendArgs::from_iter(
            ["--port", "9000", "--host=0.0.0.0", "--env-file=/tmp/test.env"]
                .into_iter()
                .map(str::to_string),
        )
        .unwrap();
        assert_eq!(args.port, Some(9000));
        assert_eq!(args.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(args.env_file, Some(PathBuf::from("/tmp/test.env")));
    }

    #[test]
    fn backend_args_rejects_unknown_flag() {
        let err = BackendArgs::from_iter(["--nope".to_string()]).unwrap_err();
        assert!(err.to_string().contains("unknown argument"));
    }

    #[test]
    fn backend_args_rejects_bad_port() {
        assert!(BackendArgs::from_iter(["--port=notaport".to_string()]).is_err());
    }

    #[test]
    fn resolve_video_id_requires_a_parameter() {
        let err = resolve_video_id(&query(None, None)).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.error, "Missing required parameter");
    }

    #[test]
    fn resolve_video_id_extracts_from_url() {
        let id = resolve_video_id(&query(
            None,
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10s"),
        ))
        .unwrap();
        assert_eq!(id, "dQw4w9WgXcQ");
    }

    #[test]
    fn resolve_video_id_rejects_garbage() {
        let err = resolve_video_id(&query(Some("hello world"), None)).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.error, "Invalid video identifier");
    }

    #[test]
    fn resolve_video_id_url_wins_over_id() {
        let id = resolve_video_id(&query(
            Some("aaaaaaaaaaa"),
            Some("https://youtu.be/dQw4w9WgXcQ"),
        ))
        .unwrap();
        assert_eq!(id, "dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn stats_without_api_key_is_config_error() {
        // Key check comes first: the 500 fires even with valid parameters,
        // and even with none at all.
        for q in [query(Some("dQw4w9WgXcQ"), None), query(None, None)] {
            let response = get_stats(State(state_without_key()), Query(q))
                .await
                .into_response();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            let body = body_json(response).await;
            assert_eq!(body["error"], "Server configuration error");
            assert!(body["timestamp"].is_string());
        }
    }

    #[tokio::test]
    async fn stats_missing_parameters_is_bad_request() {
        let state = state_with_api("http://127.0.0.1:9");
        let response = get_stats(State(state), Query(query(None, None)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Missing required parameter");
        assert_eq!(
            body["message"],
            "Please provide either 'videoId' or 'url' parameter"
        );
    }

    #[tokio::test]
    async fn stats_unknown_video_maps_not_found_to_500() {
        let base = spawn_server(mock_api(json!([]), json!([]))).await;
        let response = get_stats(
            State(state_with_api(&base)),
            Query(query(Some("dQw4w9WgXcQ"), None)),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Failed to fetch video statistics");
        assert_eq!(body["message"], "Video not found or invalid video ID");
    }

    #[tokio::test]
    async fn stats_success_envelope_contains_complete_record() {
        let base = spawn_server(mock_api(
            json!([sample_video_item()]),
            json!([sample_channel_item()]),
        ))
        .await;
        let response = get_stats(
            State(state_with_api(&base)),
            Query(query(Some("dQw4w9WgXcQ"), None)),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert!(body["timestamp"].is_string());
        let data = &body["data"];
        assert_eq!(data["videoId"], "dQw4w9WgXcQ");
        assert_eq!(data["title"], "Never Gonna Give You Up");
        assert_eq!(data["statistics"]["viewCount"], 1_000_000);
        assert_eq!(data["channelStatistics"]["subscriberCount"], 4_000_000);
        assert_eq!(data["description"], "The official video....");
    }

    #[tokio::test]
    async fn video_stats_has_no_channel_statistics() {
        let base = spawn_server(mock_api(json!([sample_video_item()]), json!([]))).await;
        let response = get_video_stats(
            State(state_with_api(&base)),
            Query(query(None, Some("https://youtu.be/dQw4w9WgXcQ"))),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["videoId"], "dQw4w9WgXcQ");
        assert!(body["data"].get("channelStatistics").is_none());
    }

    #[tokio::test]
    async fn proxy_relays_remote_data() {
        let remote = Router::new().route(
            "/api/youtube/stats",
            route_get(|| async {
                Json(json!({
                    "success": true,
                    "data": {"videoId": "dQw4w9WgXcQ"},
                    "timestamp": "2024-01-01T00:00:00Z"
                }))
            }),
        );
        let base = spawn_server(remote).await;
        let state = AppState {
            stats: None,
            proxy: ProxyClient::new(&base),
            started: Instant::now(),
        };

        let response =
            get_proxy_stats(State(state), Query(query(Some("dQw4w9WgXcQ"), None))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["source"], "vercel-proxy");
        assert_eq!(body["data"]["videoId"], "dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn proxy_relays_remote_error_status() {
        let remote = Router::new().route(
            "/api/youtube/stats",
            route_get(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "Invalid video identifier",
                        "message": "Could not extract valid video ID"
                    })),
                )
            }),
        );
        let base = spawn_server(remote).await;
        let state = AppState {
            stats: None,
            proxy: ProxyClient::new(&base),
            started: Instant::now(),
        };

        let response = get_proxy_stats(State(state), Query(query(Some("bad"), None))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Vercel API Error");
        assert_eq!(body["message"], "Could not extract valid video ID");
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn proxy_times_out_as_504() {
        let remote = Router::new().route(
            "/api/youtube/stats",
            route_get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({"success": true}))
            }),
        );
        let base = spawn_server(remote).await;
        let state = AppState {
            stats: None,
            proxy: ProxyClient::with_timeout(&base, Duration::from_millis(200)),
            started: Instant::now(),
        };

        let response =
            get_proxy_stats(State(state), Query(query(Some("dQw4w9WgXcQ"), None))).await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Request Timeout");
    }

    #[tokio::test]
    async fn proxy_unreachable_remote_is_500() {
        let state = AppState {
            stats: None,
            proxy: unreachable_proxy(),
            started: Instant::now(),
        };
        let response =
            get_proxy_stats(State(state), Query(query(Some("dQw4w9WgXcQ"), None))).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Proxy Error");
    }

    #[tokio::test]
    async fn root_reports_running() {
        let body = body_json(root().await.into_response()).await;
        assert_eq!(body["status"], "success");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn health_reports_uptime() {
        let response = health(State(state_without_key())).await.into_response();
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert!(body["uptime"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn unmatched_route_is_404_with_path() {
        let response = route_fallback(Uri::from_static("/api/nope"))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Route not found");
        assert_eq!(body["path"], "/api/nope");
    }

    #[tokio::test]
    async fn router_serves_stats_end_to_end() {
        let api_base = spawn_server(mock_api(
            json!([sample_video_item()]),
            json!([sample_channel_item()]),
        ))
        .await;
        let app = build_router(
            state_with_api(&api_base),
            vec!["http://localhost:3000".to_string()],
        );
        let base = spawn_server(app).await;

        let url = format!("{}/api/youtube/stats?videoId=dQw4w9WgXcQ", base);
        let body: Value = tokio::task::spawn_blocking(move || {
            ureq::get(&url).call().unwrap().into_json().unwrap()
        })
        .await
        .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["channelStatistics"]["videoCount"], 120);
    }
}
