use crate::collectors::dynamic::DynamicSampler;
use crate::collectors::network::NetworkPublisher;
use crate::collectors::static_info::StaticInfoProvider;
use crate::config::CorsConfig;
use crate::metrics::Metrics;
use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub static_info: Arc<StaticInfoProvider>,
    pub sampler: Arc<DynamicSampler>,
    pub network: Arc<NetworkPublisher>,
}

pub fn build_router(state: HttpAppState, cors: &CorsConfig) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/system/static", get(static_handler))
        .route("/api/system/dynamic", get(dynamic_handler))
        .route("/ws/network", get(network_ws_handler))
        .layer(cors_layer(cors))
        .with_state(state)
}

fn cors_layer(cfg: &CorsConfig) -> CorsLayer {
    let origins = if cfg.allowed_origins.iter().any(|o| o.trim() == "*") {
        AllowOrigin::any()
    } else {
        // origins are checked in Config::validate
        AllowOrigin::list(
            cfg.allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o.trim()).ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

async fn static_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    state.metrics.inc_request("static");
    Json(state.static_info.snapshot().await)
}

async fn dynamic_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    state.metrics.inc_request("dynamic");
    Json(state.sampler.sample().await)
}

async fn network_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<HttpAppState>,
) -> Response {
    state.metrics.inc_request("network_stream");
    let network = state.network.clone();
    ws.on_upgrade(move |socket| async move {
        network.stream(socket).await;
    })
}
