//! `RelayServer`: tutor socket listener plus control-plane HTTP listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::extract::{MatchedPath, Query, Request, State};
use axum::http::{HeaderValue, Method, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use relay_core::{InstanceId, MESSAGE};
use relay_pubsub::{ChannelTransport, HandlerGuard, PublishPolicy, Relay, RelayError};
use relay_settings::{ConnectionSettings, RelaySettings};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::bridge;
use crate::control::{self, ControlError};
use crate::health::{self, HealthResponse};
use crate::metrics as names;
use crate::registry::TutorRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handshake::HandshakeQuery;
use crate::websocket::session::{SessionContext, run_tutor_session};

/// Shared state accessible from Axum handlers on both listeners.
#[derive(Clone)]
pub struct AppState {
    /// Instance relay.
    pub relay: Arc<Relay>,
    /// Instance registry.
    pub registry: Arc<TutorRegistry>,
    /// Per-connection limits.
    pub limits: ConnectionSettings,
    /// This process instance.
    pub instance_id: InstanceId,
    /// When the server was created.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Server-wide shutdown signal.
    pub shutdown: CancellationToken,
}

/// Error starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding a listener failed.
    #[error("listener: {0}")]
    Io(#[from] std::io::Error),
    /// The relay could not subscribe the broadcast topic.
    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// Addresses and tasks of a running server.
#[derive(Debug)]
pub struct ServerHandle {
    /// Bound tutor socket address.
    pub socket_addr: SocketAddr,
    /// Bound control-plane address.
    pub rest_addr: SocketAddr,
    /// Dispatch loop and both listener tasks.
    pub tasks: Vec<JoinHandle<()>>,
}

/// One relay process instance.
pub struct RelayServer {
    settings: RelaySettings,
    relay: Arc<Relay>,
    registry: Arc<TutorRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    instance_id: InstanceId,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
    broadcast_guard: Mutex<Option<HandlerGuard>>,
}

impl RelayServer {
    /// Create a server over `transport`. Nothing is bound until [`listen`](Self::listen).
    pub fn new(settings: RelaySettings, transport: Arc<dyn ChannelTransport>) -> Self {
        let policy = PublishPolicy {
            attempts: settings.relay.publish_attempts,
            backoff: settings.relay.retry_backoff(),
        };
        Self {
            relay: Relay::new(transport, policy),
            registry: Arc::new(TutorRegistry::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            instance_id: InstanceId::new(),
            start_time: Instant::now(),
            metrics: None,
            broadcast_guard: Mutex::new(None),
            settings,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    fn state(&self) -> AppState {
        AppState {
            relay: Arc::clone(&self.relay),
            registry: Arc::clone(&self.registry),
            limits: self.settings.connection.clone(),
            instance_id: self.instance_id.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            shutdown: self.shutdown.token(),
        }
    }

    /// Control-plane routes.
    pub fn control_router(&self) -> Router {
        let mut router = Router::new()
            .route("/message", post(control::post_message))
            .route("/disconnect", post(control::post_disconnect))
            .route("/tutors", get(control::get_tutors))
            .route("/health", get(health_handler));
        if self.metrics.is_some() {
            router = router.route("/metrics", get(metrics_handler));
        }
        router
            .route_layer(middleware::from_fn(track_requests))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state())
    }

    /// Tutor socket routes. Cross-origin GET/POST is allowed from the
    /// control plane's localhost origin.
    pub fn socket_router(&self, rest_port: u16) -> Router {
        let cors = CorsLayer::new().allow_methods([Method::GET, Method::POST]);
        let cors = match format!("http://localhost:{rest_port}").parse::<HeaderValue>() {
            Ok(origin) => cors.allow_origin(origin),
            Err(e) => {
                warn!(rest_port, error = %e, "invalid CORS origin, cross-origin requests disabled");
                cors
            }
        };
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state())
    }

    /// Start the relay, install the broadcast fan-out and bind both listeners.
    pub async fn listen(&self) -> Result<ServerHandle, ServerError> {
        let token = self.shutdown.token();
        let dispatch = self.relay.start(token.clone()).await?;

        let registry = Arc::clone(&self.registry);
        let guard = self.relay.on_broadcast_message(MESSAGE, move |data| {
            for connection in registry.connections() {
                let _ = bridge::forward(&connection, data);
            }
        });
        *self.broadcast_guard.lock() = Some(guard);

        let host = self.settings.host.as_str();
        let rest = TcpListener::bind((host, self.settings.rest.port)).await?;
        let rest_addr = rest.local_addr()?;
        let socket = TcpListener::bind((host, self.settings.socket.port)).await?;
        let socket_addr = socket.local_addr()?;

        let rest_task = tokio::spawn(serve(rest, self.control_router(), token.clone(), "rest"));
        let socket_task = tokio::spawn(serve(
            socket,
            self.socket_router(rest_addr.port()),
            token,
            "socket",
        ));

        info!(
            instance_id = %self.instance_id,
            %socket_addr,
            %rest_addr,
            transport = self.relay.backend(),
            environment = %self.settings.environment,
            "relay listening"
        );
        Ok(ServerHandle {
            socket_addr,
            rest_addr,
            tasks: vec![dispatch, rest_task, socket_task],
        })
    }

    /// Resolved settings.
    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Instance registry.
    pub fn registry(&self) -> &Arc<TutorRegistry> {
        &self.registry
    }

    /// Instance relay.
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// This process instance.
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }
}

async fn serve(listener: TcpListener, app: Router, token: CancellationToken, name: &'static str) {
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(token.cancelled_owned())
        .await
    {
        error!(listener = name, error = %e, "listener failed");
    }
    debug!(listener = name, "listener stopped");
}

async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_default();
    let resp = next.run(req).await;
    counter!(
        names::CONTROL_REQUESTS_TOTAL,
        "route" => route,
        "status" => resp.status().as_u16().to_string()
    )
    .increment(1);
    resp
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        &state.instance_id,
        state.relay.backend(),
        state.registry.len(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

/// GET /ws
///
/// The handshake is validated before the upgrade so a bad uid answers a
/// plain 400 instead of opening a socket.
async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<HandshakeQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let profile = match query.into_profile() {
        Ok(profile) => profile,
        Err(e) => {
            debug!(error = %e, "handshake rejected");
            counter!(names::WS_REJECTED_TOTAL, "reason" => "invalid_uid").increment(1);
            return ControlError::InvalidParams("uid is invalid".into()).into_response();
        }
    };
    // A reconnect replaces its own entry, so it never grows the registry.
    if !state.registry.has(&profile.uid)
        && state.registry.len() >= state.limits.max_connections
    {
        warn!(
            uid = %profile.uid,
            max = state.limits.max_connections,
            "connection limit reached"
        );
        counter!(names::WS_REJECTED_TOTAL, "reason" => "capacity").increment(1);
        return ControlError::Unavailable("connection limit reached".into()).into_response();
    }
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let ctx = SessionContext {
        relay: state.relay,
        registry: state.registry,
        limits: state.limits.clone(),
        shutdown: state.shutdown,
    };
    ws.max_message_size(state.limits.max_message_size)
        .on_upgrade(move |socket| run_tutor_session(socket, profile, ctx))
}
