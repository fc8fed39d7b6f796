//! REST API implementation using rouille.
//!
//! # Key types
//!
//! - [`ApiServer`] - HTTP server runner, spawns background thread
//! - [`SessionView`] - JSON form of one session snapshot
//!
//! CORS headers are added to all responses for browser access.

use rouille::{Request, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;

use crate::core::{MediaEngine, PreloadError, PreloadOptions, Registry, Snapshot, StartOutcome};

/// Session snapshot for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub locator: String,
    /// Numeric status code (0 none, 1 loading, 2 ready, 3 error, 4 cached)
    pub code: i64,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

impl SessionView {
    fn new(locator: String, snapshot: Snapshot) -> Self {
        Self {
            locator,
            code: snapshot.status.code(),
            snapshot,
        }
    }
}

/// Request body for starting a session
#[derive(Debug, Deserialize)]
struct StartRequest {
    locator: String,
    #[serde(default)]
    max_bytes: u64,
    #[serde(default)]
    readahead_secs: f64,
}

/// Request body for cancelling a session
#[derive(Debug, Deserialize)]
struct LocatorRequest {
    locator: String,
}

/// Generic API response
#[derive(Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn ok() -> Self {
        Self { success: true, message: None, error: None }
    }

    fn ok_msg(msg: &str) -> Self {
        Self { success: true, message: Some(msg.to_string()), error: None }
    }

    fn err(msg: &str) -> Self {
        Self { success: false, message: None, error: Some(msg.to_string()) }
    }
}

/// REST API server
pub struct ApiServer<E: MediaEngine> {
    port: u16,
    registry: Arc<Registry<E>>,
}

impl<E: MediaEngine> ApiServer<E> {
    /// Start the API server in a background thread.
    /// The thread serves until the process exits.
    pub fn start(port: u16, registry: Arc<Registry<E>>) -> std::io::Result<thread::JoinHandle<()>> {
        let server = ApiServer { port, registry };
        thread::Builder::new()
            .name("preload-api".into())
            .spawn(move || server.run())
    }

    fn run(self) {
        let addr = format!("0.0.0.0:{}", self.port);
        log::info!("API server starting on http://{}", addr);

        let registry = self.registry;
        rouille::start_server(&addr, move |request| {
            Self::handle_request(request, &registry)
        });
    }

    fn handle_request(request: &Request, registry: &Registry<E>) -> Response {
        // Handle preflight
        if request.method() == "OPTIONS" {
            return Response::empty_204()
                .with_additional_header("Access-Control-Allow-Origin", "*")
                .with_additional_header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
                .with_additional_header("Access-Control-Allow-Headers", "Content-Type");
        }

        let response = rouille::router!(request,
            (GET) ["/api/health"] => {
                Response::json(&ApiResponse::ok_msg("preload API server"))
            },
            (GET) ["/api/sessions"] => {
                Self::get_sessions(registry)
            },
            (GET) ["/api/info"] => {
                Self::get_info(request, registry)
            },
            (POST) ["/api/start"] => {
                Self::handle_start(request, registry)
            },
            (POST) ["/api/cancel"] => {
                Self::handle_cancel(request, registry)
            },
            (POST) ["/api/clear"] => {
                registry.clear_all();
                Response::json(&ApiResponse::ok())
            },

            // Fallback
            _ => {
                Response::json(&ApiResponse::err("Not found")).with_status_code(404)
            }
        );

        // Add CORS headers to response
        response.with_additional_header("Access-Control-Allow-Origin", "*")
    }

    fn get_sessions(registry: &Registry<E>) -> Response {
        let sessions: Vec<SessionView> = registry
            .snapshots()
            .into_iter()
            .map(|(locator, snapshot)| SessionView::new(locator, snapshot))
            .collect();
        Response::json(&sessions)
    }

    fn get_info(request: &Request, registry: &Registry<E>) -> Response {
        let Some(locator) = request.get_param("locator") else {
            return Response::json(&ApiResponse::err("Missing locator parameter"))
                .with_status_code(400);
        };
        // Unknown locators report status None, like the registry does
        let snapshot = registry.info_or_default(&locator);
        Response::json(&SessionView::new(locator, snapshot))
    }

    fn handle_start(request: &Request, registry: &Registry<E>) -> Response {
        let req = match rouille::input::json_input::<StartRequest>(request) {
            Ok(req) => req,
            Err(e) => {
                return Response::json(&ApiResponse::err(&format!("Invalid JSON: {}", e)))
                    .with_status_code(400);
            }
        };
        let options = PreloadOptions::new(req.max_bytes, req.readahead_secs);
        match registry.start(&req.locator, options) {
            Ok(StartOutcome::Started) => Response::json(&ApiResponse::ok_msg("started")),
            Ok(StartOutcome::AlreadyActive) => Response::json(&ApiResponse::ok_msg("already active")),
            Err(e) => Self::error_response(&e),
        }
    }

    fn handle_cancel(request: &Request, registry: &Registry<E>) -> Response {
        match rouille::input::json_input::<LocatorRequest>(request) {
            Ok(req) => match registry.cancel(&req.locator) {
                Ok(()) => Response::json(&ApiResponse::ok()),
                Err(e) => Self::error_response(&e),
            },
            Err(e) => Response::json(&ApiResponse::err(&format!("Invalid JSON: {}", e)))
                .with_status_code(400),
        }
    }

    fn error_response(err: &PreloadError) -> Response {
        let status = match err {
            PreloadError::InvalidArgument(_) => 400,
            PreloadError::NotFound(_) => 404,
            PreloadError::NoCapacity(_) => 503,
            PreloadError::Engine(_) => 500,
        };
        Response::json(&ApiResponse::err(&err.to_string())).with_status_code(status)
    }
}
