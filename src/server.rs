//! HTTP front end for the ingestion pipeline.
//!
//! `POST /ingest` takes a profile body and answers with the JSON
//! [`PutReport`](crate::PutReport) of the stored batch. Parameters are
//! resolved before the body is read so a bad query never costs a download.
//! Decoding and storage run on the blocking pool; one request failing never
//! takes the server down.

use hyper::body::HttpBody;
use hyper::server::conn::AddrIncoming;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode, header};
use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

use crate::{IngestParams, Ingester, PutReport, StackpileError, StackpileResult};

pub const INGEST_PATH: &str = "/ingest";
pub const HEALTH_PATH: &str = "/healthz";

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug)]
struct ServerState {
    ingester: Ingester,
    max_body_bytes: u64,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    status: &'static str,
    code: &'a str,
    message: String,
}

#[derive(Debug, Clone)]
pub struct IngestServer {
    state: Arc<ServerState>,
}

impl IngestServer {
    pub fn new(ingester: Ingester, max_body_bytes: u64) -> Self {
        Self {
            state: Arc::new(ServerState {
                ingester,
                max_body_bytes,
            }),
        }
    }

    /// Serves on `addr` until `shutdown` resolves. Must be called from
    /// within a tokio runtime.
    pub async fn run<F>(self, addr: SocketAddr, shutdown: F) -> StackpileResult<()>
    where
        F: Future<Output = ()>,
    {
        let builder = hyper::Server::try_bind(&addr)?;
        self.serve(builder, shutdown).await
    }

    /// Binds `addr` and serves from a dedicated thread with its own runtime.
    /// Binding happens before this returns, so port 0 is resolved in the
    /// handle.
    pub fn spawn(self, addr: SocketAddr) -> StackpileResult<ServerHandle> {
        let listener = std::net::TcpListener::bind(addr)?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = Builder::new()
            .name("stackpile:http".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        tracing::error!("failed to start http runtime: {err}");
                        return;
                    }
                };
                runtime.block_on(async move {
                    let served = match hyper::Server::from_tcp(listener) {
                        Ok(builder) => {
                            self.serve(builder, async {
                                let _ = shutdown_rx.await;
                            })
                            .await
                        }
                        Err(err) => Err(err.into()),
                    };
                    if let Err(err) = served {
                        tracing::error!("http server on {addr} failed: {err}");
                    }
                });
            })?;

        Ok(ServerHandle {
            addr,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    async fn serve<F>(
        self,
        builder: hyper::server::Builder<AddrIncoming>,
        shutdown: F,
    ) -> StackpileResult<()>
    where
        F: Future<Output = ()>,
    {
        let state = self.state;
        let make_service = make_service_fn(move |_| {
            let state = state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle(state.clone(), req)))
            }
        });
        let server = builder.serve(make_service);
        tracing::info!("ingestion endpoint at http://{}{INGEST_PATH}", server.local_addr());
        server.with_graceful_shutdown(shutdown).await?;
        tracing::info!("http server stopped");
        Ok(())
    }
}

/// A server running on its own thread. Dropping the handle stops the server
/// and waits for the thread.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{path_and_query}", self.addr)
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("http server thread panicked");
            }
        }
    }
}

async fn handle(state: Arc<ServerState>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, INGEST_PATH) => {
            let request_id = Uuid::new_v4();
            let mut response = match ingest(&state, request_id, req).await {
                Ok(report) => json_response(StatusCode::OK, &report),
                Err(err) => {
                    if err.is_client_error() {
                        tracing::warn!(%request_id, "rejected ingest request: {err}");
                    } else {
                        tracing::error!(%request_id, "ingest failed: {err}");
                    }
                    error_response(err.http_status(), err.code(), err.to_string())
                }
            };
            if let Ok(value) = header::HeaderValue::from_str(&request_id.to_string()) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            response
        }
        (_, INGEST_PATH) => {
            let mut response = error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "method_not_allowed",
                format!("{INGEST_PATH} only accepts POST"),
            );
            response
                .headers_mut()
                .insert(header::ALLOW, header::HeaderValue::from_static("POST"));
            response
        }
        (&Method::GET, HEALTH_PATH) => {
            let mut response = Response::new(Body::from("ok"));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("text/plain"),
            );
            response
        }
        (_, path) => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no route for {path}"),
        ),
    };
    Ok(response)
}

async fn ingest(
    state: &ServerState,
    request_id: Uuid,
    req: Request<Body>,
) -> StackpileResult<PutReport> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let params = IngestParams::resolve_now(req.uri().query(), content_type)?;

    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > state.max_body_bytes) {
        return Err(StackpileError::BodyTooLarge(state.max_body_bytes));
    }
    let body = read_body(req.into_body(), state.max_body_bytes).await?;

    let span = tracing::info_span!(
        "ingest",
        %request_id,
        label_key = %params.label_key,
        format = params.format.as_str(),
    );
    let ingester = state.ingester.clone();
    let report = tokio::task::spawn_blocking(move || {
        let _enter = span.enter();
        let report = ingester.ingest(&params, &body[..])?;
        tracing::info!(
            samples = report.samples,
            nodes = report.nodes,
            bytes = body.len(),
            "stored batch"
        );
        Ok::<_, StackpileError>(report)
    })
    .await
    .map_err(|e| StackpileError::Http(format!("ingest task failed: {e}")))??;
    Ok(report)
}

async fn read_body(mut body: Body, limit: u64) -> StackpileResult<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(|e| StackpileError::BodyRead(e.to_string()))?;
        if (buf.len() + chunk.len()) as u64 > limit {
            return Err(StackpileError::BodyTooLarge(limit));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(bytes) => {
            let mut response = Response::new(Body::from(bytes));
            *response.status_mut() = status;
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(err) => {
            let mut response = Response::new(Body::from(err.to_string()));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

fn error_response(status: StatusCode, code: &str, message: String) -> Response<Body> {
    json_response(
        status,
        &ErrorBody {
            status: "error",
            code,
            message,
        },
    )
}
