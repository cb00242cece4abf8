//! app-token-server: HTTP front end of the GitHub App token exchange
//!
//! Lightweight HTTP server using hyper. `POST /` runs the exchange; every
//! connection is served on its own task of a multi-threaded tokio runtime.

use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use app_token_core::config::Config;
use app_token_core::error::{ApiError, ErrorResponse};
use app_token_core::sts::Handler;

mod platform;

use platform::{ProcessEnv, ReqwestHttpClient, SystemClock};

/// Request bodies are a short JSON object; anything larger is refused
const MAX_BODY_BYTES: usize = 64 * 1024;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state
struct AppState {
    handler: Handler,
}

type HyperResponse = Response<Full<Bytes>>;

#[tokio::main]
async fn main() {
    setup_tracing();

    if let Err(e) = run().await {
        error!(error = %e, "app-token-server failed");
        std::process::exit(1);
    }
}

/// `RUST_LOG` filters (default `info`); `LOG_FORMAT=json` switches to JSON lines
fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry().with(filter);

    match std::env::var("LOG_FORMAT").ok().as_deref() {
        Some("json") => subscriber.with(fmt::layer().json()).init(),
        _ => subscriber.with(fmt::layer()).init(),
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let port: u16 = match std::env::var("PORT") {
        Ok(port) => port.parse().map_err(|e| format!("PORT must be a number: {}", e))?,
        Err(_) => 8080,
    };

    let config = Config::from_env(&ProcessEnv)?;
    let handler = Handler::from_config(
        &config,
        Arc::new(ReqwestHttpClient::new()?),
        Arc::new(SystemClock),
    )?;
    info!(
        app_id = config.github_app_id,
        api_url = %config.github_api_url,
        issuer = %config.oidc_issuer,
        "configuration loaded"
    );

    let state = Arc::new(AppState { handler });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "app-token-server listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };
        let state = state.clone();

        tokio::spawn(async move {
            let io = hyper_util::rt::TokioIo::new(stream);
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { handle_request(req, &state).await }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(error = %e, %peer, "connection error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: &AppState,
) -> Result<HyperResponse, std::convert::Infallible> {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let mut response = route_request(req, state).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    Ok(response)
}

async fn route_request(req: Request<Incoming>, state: &AppState) -> HyperResponse {
    if req.uri().path() != "/" {
        return json_response(
            StatusCode::NOT_FOUND,
            serde_json::to_vec(&serde_json::json!({"message": "Not Found"})).unwrap_or_default(),
        );
    }

    let method = req.method().clone();
    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = if method == Method::POST {
        match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return error_response(&ApiError::invalid_request(format!(
                    "failed to read the request body: {}",
                    e
                )))
            }
        }
    } else {
        Bytes::new()
    };

    let (status, body) = state
        .handler
        .handle_request(method.as_str(), authorization.as_deref(), &body)
        .await;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    info!(status = status.as_u16(), "request completed");
    json_response(status, body)
}

fn error_response(err: &ApiError) -> HyperResponse {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::to_vec(&ErrorResponse::from(err)).unwrap_or_default();
    json_response(status, body)
}

fn json_response(status: StatusCode, body: Vec<u8>) -> HyperResponse {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
