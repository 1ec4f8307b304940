use crate::error::{ApiError, ErrorCode, PtyError, PtyResult};
use crate::http::{self, POLL_PATH, Reply, Request};
use crate::render;
use axum::Router;
use axum::body::Body;
use axum::extract::{Request as HttpRequest, State};
use axum::http::header::{CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tower_http::set_header::SetResponseHeaderLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub(super) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connection is half duplex: it reads one request, then writes one
/// response, then it is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Receiving,
    Sending,
    Closed,
}

pub enum ConnectionEvent {
    Request {
        id: ConnectionId,
        request: Request,
        reply: oneshot::Sender<Reply>,
    },
    Closed {
        id: ConnectionId,
        error: Option<PtyError>,
    },
}

#[derive(Debug, Clone, Copy)]
pub(super) struct Limits {
    pub max_request_bytes: usize,
    /// Whole-connection deadline, from accept to the last response byte.
    pub request_timeout: Duration,
}

/// Router state: which connection a handler answers for and where the loop
/// listens.
#[derive(Clone)]
struct Route {
    id: ConnectionId,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    max_request_bytes: usize,
}

pub(super) async fn serve(
    id: ConnectionId,
    stream: TcpStream,
    peer: SocketAddr,
    limits: Limits,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let error = handle_connection(id, stream, peer, limits, &events)
        .await
        .err();
    let _ = events.send(ConnectionEvent::Closed { id, error });
}

async fn handle_connection(
    id: ConnectionId,
    stream: TcpStream,
    peer: SocketAddr,
    limits: Limits,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
) -> PtyResult<()> {
    let router = router(Route {
        id,
        events: events.clone(),
        max_request_bytes: limits.max_request_bytes,
    });
    let connection = http1::Builder::new()
        .keep_alive(false)
        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(router));

    match tokio::time::timeout(limits.request_timeout, connection).await {
        Ok(result) => result.map_err(|err| {
            ApiError::new(ErrorCode::IoError, "HTTP connection failed")
                .with_details(err.to_string())
                .into()
        }),
        Err(_) => Err(ApiError::new(ErrorCode::IoError, "Request timed out")
            .with_details(format!(
                "{peer} did not finish within {}ms",
                limits.request_timeout.as_millis()
            ))
            .into()),
    }
}

fn router(route: Route) -> Router {
    Router::new()
        .route(POLL_PATH, get(poll_query).post(poll_form))
        .fallback(static_file)
        .layer(SetResponseHeaderLayer::overriding(
            CONNECTION,
            HeaderValue::from_static("close"),
        ))
        .with_state(route)
}

/// `GET /u?...`. Without a query string `/u` is an ordinary file.
async fn poll_query(State(route): State<Route>, request: HttpRequest) -> Response {
    let call = match request.uri().query() {
        Some(query) => http::poll_request(query.as_bytes()),
        None => Request::File(POLL_PATH.to_string()),
    };
    let reply = exchange(&route, call).await;
    deliver(reply, request).await
}

async fn poll_form(State(route): State<Route>, request: HttpRequest) -> Response {
    let (parts, body) = request.into_parts();
    let form: Bytes = match axum::body::to_bytes(body, route.max_request_bytes).await {
        Ok(form) => form,
        Err(err) => {
            tracing::debug!(connection = %route.id, error = %err, "Poll body rejected");
            return text_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large\n");
        }
    };
    let reply = exchange(&route, http::poll_request(&form)).await;
    deliver(reply, HttpRequest::from_parts(parts, Body::empty())).await
}

async fn static_file(State(route): State<Route>, request: HttpRequest) -> Response {
    let call = Request::File(request.uri().path().to_string());
    let reply = exchange(&route, call).await;
    deliver(reply, request).await
}

/// Hands the request to the loop and waits for its answer. `None` when the
/// loop is gone.
async fn exchange(route: &Route, request: Request) -> Option<Reply> {
    let (reply, response) = oneshot::channel();
    route
        .events
        .send(ConnectionEvent::Request {
            id: route.id,
            request,
            reply,
        })
        .ok()?;
    response.await.ok()
}

async fn deliver(reply: Option<Reply>, request: HttpRequest) -> Response {
    match reply {
        Some(Reply::Frame(body)) => ([(CONTENT_TYPE, render::CONTENT_TYPE)], body).into_response(),
        Some(Reply::Text { status, body }) => text_response(status, &body),
        Some(Reply::File { path, resource }) => serve_file(path, &resource, request).await,
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

fn text_response(status: StatusCode, body: &str) -> Response {
    (status, [(CONTENT_TYPE, "text/plain")], body.to_string()).into_response()
}

async fn serve_file(path: PathBuf, resource: &str, request: HttpRequest) -> Response {
    let mime = HeaderValue::from_static(http::mime_type(&path));
    let mut response = match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    if response.status() == StatusCode::NOT_FOUND {
        tracing::debug!(path = %path.display(), "Static file missing");
        let body = http::resource_message(resource, "No such file or directory");
        return text_response(StatusCode::NOT_FOUND, &body);
    }
    response.headers_mut().insert(CONTENT_TYPE, mime);
    response.map(Body::new)
}
