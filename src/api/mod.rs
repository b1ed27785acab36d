//! HTTP surface.
//!
//! Routes:
//! - `POST /detect`: multipart upload (field `video`), runs a detection job
//! - `GET /output/{filename}`: published videos with byte-range support
//! - `GET /health`: liveness
//!
//! The server runs actix-web on a dedicated thread with its own actix system.
//! Job work runs on the blocking pool so long uploads never stall range reads.

mod detect;
mod output;

use std::net::{SocketAddr, TcpListener};
use std::sync::mpsc;
use std::thread::JoinHandle;

use actix_web::http::{header, StatusCode};
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpResponse, HttpServer, ResponseError};
use anyhow::{anyhow, Context, Result};
use serde_json::json;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::detect::BackendRegistry;
use crate::error::{PipelineError, ServeError};
use crate::job::DetectionJob;
use crate::range::unsatisfied_content_range;

pub use detect::DetectResponse;

/// Route name used to build absolute output URLs.
pub const SERVE_OUTPUT_ROUTE: &str = "serve_output";

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub workers: usize,
    /// Base for `output_video_url`. When unset, the URL is derived from the
    /// request's host and scheme.
    pub public_base_url: Option<String>,
    pub max_upload_bytes: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
            workers: 4,
            public_base_url: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// State shared by every worker.
pub struct AppState {
    job: DetectionJob,
    registry: BackendRegistry,
    public_base_url: Option<String>,
    max_upload_bytes: u64,
}

impl AppState {
    pub fn new(job: DetectionJob, registry: BackendRegistry, cfg: &ApiConfig) -> Self {
        Self {
            job,
            registry,
            public_base_url: cfg
                .public_base_url
                .as_ref()
                .map(|base| base.trim_end_matches('/').to_string()),
            max_upload_bytes: cfg.max_upload_bytes,
        }
    }
}

/// Register all routes. Handlers expect `web::Data<AppState>` in app data.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/detect", web::post().to(detect::detect))
        .service(
            web::resource("/output/{filename}")
                .name(SERVE_OUTPUT_ROUTE)
                .route(web::get().to(output::serve_output)),
        )
        .route("/health", web::get().to(health));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No video file provided")]
    MissingVideo,

    #[error("upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },

    #[error("upload interrupted: {0}")]
    Upload(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Serve(#[from] ServeError),

    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingVideo | ApiError::Upload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Pipeline(PipelineError::Input(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Serve(ServeError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Serve(ServeError::RangeNotSatisfiable { .. }) => {
                StatusCode::RANGE_NOT_SATISFIABLE
            }
            ApiError::Serve(ServeError::Io(_)) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());
        match self {
            ApiError::Pipeline(err) => {
                response.json(json!({ "error": err.code(), "detail": err.to_string() }))
            }
            ApiError::Serve(ServeError::RangeNotSatisfiable { size }) => response
                .insert_header((header::CONTENT_RANGE, unsatisfied_content_range(*size)))
                .insert_header((header::ACCEPT_RANGES, "bytes"))
                .json(json!({ "error": self.to_string() })),
            ApiError::Serve(ServeError::Io(_)) | ApiError::Internal(_) => {
                log::error!("request failed: {}", self);
                response.json(json!({ "error": "internal_error" }))
            }
            _ => response.json(json!({ "error": self.to_string() })),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections, let in-flight requests finish, join the thread.
    pub fn stop(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for ApiHandle {
    /// Signals a graceful stop without waiting for it. Use `stop` to join.
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: AppState) -> Self {
        Self { cfg, state }
    }

    /// Bind and start serving on a background thread.
    ///
    /// Returns once the listener is accepting. Port 0 picks a free port; the
    /// bound address is in `ApiHandle::addr`.
    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid api address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("failed to bind {configured_addr}"))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let workers = self.cfg.workers.max(1);
        let data = web::Data::new(self.state);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<std::io::Result<()>>();

        let join = std::thread::Builder::new()
            .name("siren-api".into())
            .spawn(move || {
                let result = actix_web::rt::System::new().block_on(async move {
                    let server = match HttpServer::new(move || {
                        App::new()
                            .app_data(data.clone())
                            .wrap(Logger::default())
                            .configure(configure)
                    })
                    .workers(workers)
                    .listen(listener)
                    {
                        Ok(server) => server.run(),
                        Err(err) => {
                            let _ = ready_tx.send(Err(std::io::Error::new(err.kind(), err.to_string())));
                            return Err(err);
                        }
                    };
                    let _ = ready_tx.send(Ok(()));

                    let server_handle = server.handle();
                    actix_web::rt::spawn(async move {
                        let _ = shutdown_rx.await;
                        server_handle.stop(true).await;
                    });
                    server.await
                });
                if let Err(err) = result {
                    log::error!("api server stopped: {}", err);
                }
            })
            .context("failed to spawn api server thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(anyhow!("api server failed to start: {}", err)),
            Err(_) => return Err(anyhow!("api server thread exited during startup")),
        }
        log::info!("api listening on http://{}", addr);

        Ok(ApiHandle {
            addr,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }
}
