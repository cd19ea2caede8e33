use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

use scanlens::common::init_logger_exe;
use scanlens::credentials;
use scanlens::error::ScanError;
use scanlens::scan::scan_image;
use scanlens::vertex::{VertexClient, VertexConfig};
use serde::Serialize;

/// Uploads larger than this are rejected before the handler runs.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_logger_exe();

    log::info!("Starting server...");

    let state = AppState::new();

    // Eager first construction so `/` reports readiness immediately; a
    // failure is logged and reported per request, never fatal
    match build_client() {
        Ok(client) => {
            state.store(client).await;
            log::info!("model client ready");
        }
        Err(err) => log::error!("model client not ready at startup: {}", err),
    }

    let app = Router::new()
        .route("/", get(home))
        .route("/scan", post(scan))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "5000".to_string());
    let addr = SocketAddr::from(([0, 0, 0, 0], port.parse().unwrap()));

    log::info!("Attempting to bind to port {}", port);

    let listener = TcpListener::bind(addr).await.unwrap();
    log::info!("Successfully bound to http://{}", addr);

    axum::serve(listener, app).await.unwrap();
}

/// Shared handler state: the lazily-built model client. Read-mostly after
/// the first successful construction; a rebuild race is benign.
#[derive(Clone)]
struct AppState {
    client: Arc<RwLock<Option<Arc<VertexClient>>>>,
}

impl AppState {
    fn new() -> Self {
        Self {
            client: Arc::new(RwLock::new(None)),
        }
    }

    async fn store(&self, client: VertexClient) {
        *self.client.write().await = Some(Arc::new(client));
    }

    async fn ready(&self) -> bool {
        self.client.read().await.is_some()
    }

    /// Return the cached handle, attempting at most one construction per
    /// request when it is absent.
    async fn get_or_create(&self) -> Result<Arc<VertexClient>, ScanError> {
        if let Some(client) = self.client.read().await.as_ref() {
            return Ok(client.clone());
        }

        let mut slot = self.client.write().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = Arc::new(build_client()?);
        *slot = Some(client.clone());
        log::info!("model client rebuilt");
        Ok(client)
    }

    /// Drop the cached handle so the next request rebuilds it.
    async fn invalidate(&self) {
        *self.client.write().await = None;
    }
}

fn build_client() -> Result<VertexClient, ScanError> {
    let config = VertexConfig::from_env()
        .ok_or_else(|| ScanError::Configuration("GOOGLE_PROJECT_ID is not set".to_string()))?;
    let key = credentials::assemble_from_env().ok_or_else(|| {
        ScanError::Configuration("service account credentials are missing or incomplete".to_string())
    })?;
    VertexClient::create(config, key).ok_or_else(|| {
        ScanError::ClientUnavailable("failed to construct the model client".to_string())
    })
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    mode: &'static str,
    client_ready: bool,
}

#[derive(Serialize)]
struct ScanSuccess {
    success: bool,
    text: String,
}

#[derive(Serialize)]
struct ScanFailure {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

fn error_response(err: &ScanError) -> (StatusCode, Json<ScanFailure>) {
    let status = match err {
        ScanError::Input(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ScanFailure {
            success: false,
            error: err.to_string(),
            details: None,
        }),
    )
}

async fn home(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "online",
        mode: "vertex-ai",
        client_ready: state.ready().await,
    })
}

async fn scan(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut image: Option<(Vec<u8>, String)> = None;
    let mut language: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return error_response(&ScanError::Input(format!(
                    "malformed multipart body: {}",
                    e
                )))
                .into_response()
            }
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let mime_type = field.content_type().unwrap_or("image/jpeg").to_string();
                match field.bytes().await {
                    Ok(bytes) => image = Some((bytes.to_vec(), mime_type)),
                    Err(e) => {
                        return error_response(&ScanError::Input(format!(
                            "failed to read image field: {}",
                            e
                        )))
                        .into_response()
                    }
                }
            }
            Some("language") => {
                language = field.text().await.ok();
            }
            _ => {}
        }
    }

    let Some((bytes, mime_type)) = image else {
        return error_response(&ScanError::Input("No image found".to_string())).into_response();
    };

    let client = match state.get_or_create().await {
        Ok(client) => client,
        Err(err) => {
            log::error!("scan rejected: {}", err);
            return error_response(&err).into_response();
        }
    };

    let language = language
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| client.default_language().to_string());

    match scan_image(&client, &bytes, &mime_type, &language).await {
        Ok(text) => {
            log::info!("extracted {} characters", text.len());
            (StatusCode::OK, Json(ScanSuccess { success: true, text })).into_response()
        }
        Err(err) => {
            log::error!("scan failed: {}", err);
            if err.invalidates_client() {
                state.invalidate().await;
            }
            error_response(&err).into_response()
        }
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string();

    log::error!("request handler panicked: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ScanFailure {
            success: false,
            error: "internal server error".to_string(),
            details: Some(detail),
        }),
    )
        .into_response()
}
