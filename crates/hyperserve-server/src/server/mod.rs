//! Server kernel: listener binding, request dispatch, lifecycle.
//!
//! The kernel accepts HTTP traffic on the main listener (and an optional
//! health listener), drives each connection on its own task, and composes
//! the per-request pipeline: readiness gate, middleware chain, interceptor
//! chain, terminal handler. Shutdown is ordered: main listener, health
//! listener, maintenance tasks, then user shutdown hooks.

mod builder;
mod shutdown;

pub use builder::ServerBuilder;
pub use shutdown::ShutdownHandle;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use http::StatusCode;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::handler::{
    ClientAddr, HttpHandler, HttpRequest, HttpResponse, handler_fn, text_response,
};
use crate::interceptor::{Interceptor, InterceptorChain};
use crate::io::TimeoutIo;
use crate::metrics::ServerMetrics;
use crate::middleware::{
    AuthToken, GLOBAL_PATTERN, Middleware, MiddlewareRegistry, RateLimit, secure_web,
};
use crate::mux::RouteMux;
use crate::options::ServerOptions;
use crate::rate_limit::RateLimiter;

pub(crate) struct ServerInner {
    pub(crate) options: ServerOptions,
    pub(crate) mux: RouteMux,
    pub(crate) middleware: MiddlewareRegistry,
    pub(crate) interceptors: Arc<InterceptorChain>,
    pub(crate) rate_limiter: Option<Arc<RateLimiter>>,
    pub(crate) metrics: Arc<ServerMetrics>,
    running: AtomicBool,
    ready: AtomicBool,
    stopping: AtomicBool,
    on_ready_ran: AtomicBool,
    deferred_error: Mutex<Option<String>>,
    started: Mutex<Option<(Instant, SystemTime)>>,
    shutdown_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
}

/// The HyperServe HTTP kernel
///
/// Cheap to clone; all state lives behind one shared inner.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.inner.options.addr)
            .field("running", &self.running())
            .field("ready", &self.ready())
            .finish()
    }
}

impl Server {
    /// Start building a server
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Build a server from options
    pub fn new(options: ServerOptions) -> Self {
        let rate_limiter = options
            .rate_limit
            .filter(|rl| rl.rate > 0.0 && rl.burst > 0)
            .map(|rl| Arc::new(RateLimiter::new(rl)));

        let (shutdown_tx, _) = watch::channel(false);
        let (done_tx, _) = watch::channel(false);

        let server = Self {
            inner: Arc::new(ServerInner {
                options,
                mux: RouteMux::new(),
                middleware: MiddlewareRegistry::new(),
                interceptors: Arc::new(InterceptorChain::new()),
                rate_limiter,
                metrics: Arc::new(ServerMetrics::default()),
                running: AtomicBool::new(false),
                ready: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                on_ready_ran: AtomicBool::new(false),
                deferred_error: Mutex::new(None),
                started: Mutex::new(None),
                shutdown_tx,
                done_tx,
            }),
        };

        if let Some(limiter) = &server.inner.rate_limiter {
            server
                .inner
                .middleware
                .add(GLOBAL_PATTERN, Arc::new(RateLimit::new(limiter.clone())));
        }
        if server.inner.options.hardened {
            let tls = server.inner.options.tls_acceptor.is_some();
            server
                .inner
                .middleware
                .add_stack(GLOBAL_PATTERN, secure_web(tls));
        }
        if let Some(cors) = server.inner.options.cors.clone() {
            server
                .inner
                .middleware
                .add(GLOBAL_PATTERN, crate::middleware::cors(cors));
        }
        if let Some(validator) = server.inner.options.auth_validator.clone() {
            server
                .inner
                .middleware
                .add(GLOBAL_PATTERN, Arc::new(AuthToken::new(validator)));
        }

        server
    }

    /// Register a terminal handler on the route multiplexer
    pub fn handle(&self, pattern: impl Into<String>, handler: HttpHandler) {
        self.inner.mux.handle(pattern, handler);
    }

    /// Register a plain async function as a terminal handler
    pub fn handle_fn<F, Fut>(&self, pattern: impl Into<String>, f: F)
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HttpResponse> + Send + 'static,
    {
        self.handle(pattern, handler_fn(f));
    }

    /// Append a middleware for a route pattern (`"*"` is global)
    pub fn add_middleware(&self, pattern: impl Into<String>, middleware: Arc<dyn Middleware>) {
        self.inner.middleware.add(pattern, middleware);
    }

    /// Append an ordered middleware stack for a route pattern
    pub fn add_middleware_stack(
        &self,
        pattern: impl Into<String>,
        stack: Vec<Arc<dyn Middleware>>,
    ) {
        self.inner.middleware.add_stack(pattern, stack);
    }

    /// Register the baseline recovery + logging stack globally
    pub fn add_default_middleware(&self) {
        info!("Default middleware registered");
        self.inner
            .middleware
            .extend_quiet(GLOBAL_PATTERN, crate::middleware::default_middleware());
    }

    /// Append an interceptor
    pub fn add_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        self.inner.interceptors.add(interceptor);
    }

    /// Server options
    pub fn options(&self) -> &ServerOptions {
        &self.inner.options
    }

    /// Kernel request metrics
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.inner.metrics.clone()
    }

    /// Read-only route → middleware-names view
    pub fn middleware_routes(&self) -> Vec<(String, Vec<String>)> {
        self.inner.middleware.routes()
    }

    /// Number of registered middleware entries
    pub fn middleware_count(&self) -> usize {
        self.inner.middleware.len()
    }

    /// Registered route patterns
    pub fn route_patterns(&self) -> Vec<String> {
        self.inner.mux.patterns()
    }

    /// Number of tracked rate-limiter clients
    pub fn rate_limiter_entries(&self) -> usize {
        self.inner
            .rate_limiter
            .as_ref()
            .map_or(0, |limiter| limiter.len())
    }

    /// Whether the server is accepting traffic
    pub fn running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Whether deferred initialization has completed
    pub fn ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    /// Time since `run()` started, if running
    pub fn uptime(&self) -> Option<Duration> {
        self.inner.started.lock().map(|(mono, _)| mono.elapsed())
    }

    /// Wall-clock start time, if running
    pub fn started_at(&self) -> Option<SystemTime> {
        self.inner.started.lock().map(|(_, wall)| wall)
    }

    /// A cloneable handle for triggering shutdown externally
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.clone())
    }

    /// Run the server until shutdown.
    ///
    /// Binds the listeners, starts maintenance tasks, kicks off deferred
    /// initialization and blocks. Returns the terminating error, if any.
    pub async fn run(&self) -> ServerResult<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::Lifecycle("server already running".to_string()));
        }
        *self.inner.started.lock() = Some((Instant::now(), SystemTime::now()));

        let listener = TcpListener::bind(&self.inner.options.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.inner.options.addr.clone(),
                source,
            })?;
        info!(addr = %self.inner.options.addr, tls = self.inner.options.tls_acceptor.is_some(), "Server listening");

        let health_task = match &self.inner.options.health_addr {
            Some(addr) => {
                let health_listener =
                    TcpListener::bind(addr)
                        .await
                        .map_err(|source| ServerError::Bind {
                            addr: addr.clone(),
                            source,
                        })?;
                info!(addr = %addr, "Health listener bound");
                let server = self.clone();
                let shutdown = self.inner.shutdown_tx.subscribe();
                Some(tokio::spawn(async move {
                    server.accept_loop(health_listener, shutdown).await;
                }))
            }
            None => None,
        };

        let limiter_task = self.inner.rate_limiter.as_ref().map(|limiter| {
            let limiter = limiter.clone();
            let shutdown = self.inner.shutdown_tx.subscribe();
            tokio::spawn(async move { limiter.run_maintenance(shutdown).await })
        });

        match &self.inner.options.deferred_init {
            Some(deferred) => {
                let server = self.clone();
                let callback = deferred.callback.clone();
                let stop_on_failure = deferred.stop_on_failure;
                tokio::spawn(async move {
                    match callback(server.clone()).await {
                        Ok(()) => server.finish_ready(),
                        Err(e) => {
                            warn!(error = %e, "deferred initialization failed");
                            *server.inner.deferred_error.lock() = Some(e.to_string());
                            if stop_on_failure {
                                server.signal_shutdown();
                            }
                        }
                    }
                });
            }
            None => self.finish_ready(),
        }

        self.accept_loop(listener, self.inner.shutdown_tx.subscribe())
            .await;
        // Main listener is closed once the loop exits; shut the health
        // listener next, then maintenance, then the hooks.
        if let Some(task) = health_task {
            let _ = task.await;
        }
        if let Some(task) = limiter_task {
            let _ = task.await;
        }
        self.run_shutdown_hooks().await;

        self.inner.running.store(false, Ordering::SeqCst);
        let _ = self.inner.done_tx.send(true);
        info!("Server stopped");

        let fatal = self.inner.deferred_error.lock().clone();
        match fatal {
            Some(message)
                if self
                    .inner
                    .options
                    .deferred_init
                    .as_ref()
                    .is_some_and(|d| d.stop_on_failure) =>
            {
                Err(ServerError::DeferredInit(message))
            }
            _ => Ok(()),
        }
    }

    /// Trigger graceful shutdown and wait for teardown to finish.
    ///
    /// Idempotent. Bound the wait with `tokio::time::timeout` to mirror a
    /// caller-supplied deadline.
    pub async fn stop(&self) {
        if !self.running() {
            return;
        }
        let mut done = self.inner.done_tx.subscribe();
        self.signal_shutdown();
        while !*done.borrow() {
            if done.changed().await.is_err() {
                return;
            }
        }
    }

    /// Complete a previously failed (or still pending) deferred init.
    ///
    /// With an error, the stored failure is surfaced again. With `None`, the
    /// server is marked ready belatedly.
    pub fn complete_deferred_init(&self, err: Option<ServerError>) -> ServerResult<()> {
        if let Some(e) = err {
            let message = e.to_string();
            *self.inner.deferred_error.lock() = Some(message.clone());
            return Err(ServerError::DeferredInit(message));
        }
        if let Some(stored) = self.inner.deferred_error.lock().take() {
            debug!(error = %stored, "clearing stored deferred-init failure");
        }
        self.finish_ready();
        Ok(())
    }

    fn signal_shutdown(&self) {
        if !self.inner.stopping.swap(true, Ordering::SeqCst) {
            info!("Shutdown initiated");
        }
        let _ = self.inner.shutdown_tx.send(true);
    }

    fn finish_ready(&self) {
        if !self.inner.on_ready_ran.swap(true, Ordering::SeqCst)
            && let Some(on_ready) = self.inner.options.on_ready.clone()
        {
            // Routes registered here become visible before the ready flip.
            on_ready(self.clone());
        }
        if !self.inner.ready.swap(true, Ordering::SeqCst) {
            info!("Server ready");
        }
    }

    async fn run_shutdown_hooks(&self) {
        for (index, hook) in self.inner.options.shutdown_hooks.iter().enumerate() {
            if let Err(e) = hook().await {
                error!(hook = index, error = %e, "shutdown hook failed");
            }
        }
    }

    async fn accept_loop(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            let shutdown_for_conn = shutdown.clone();
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let server = self.clone();
                            let shutdown = shutdown_for_conn;
                            tokio::spawn(async move {
                                server.serve_stream(stream, peer, shutdown).await;
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
                // wait_for also resolves when shutdown was signaled before
                // this receiver subscribed.
                _ = shutdown.wait_for(|stop| *stop) => return,
            }
        }
    }

    async fn serve_stream(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) {
        match &self.inner.options.tls_acceptor {
            Some(acceptor) => match acceptor(stream).await {
                Ok(tls_stream) => {
                    self.serve_connection(tls_stream, peer, shutdown).await;
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "TLS handshake failed");
                }
            },
            None => self.serve_connection(stream, peer, shutdown).await,
        }
    }

    async fn serve_connection<S>(&self, stream: S, peer: SocketAddr, mut shutdown: watch::Receiver<bool>)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let timeouts = self.inner.options.timeouts;
        let io = TimeoutIo::new(stream, timeouts.read, timeouts.write);

        let server = self.clone();
        let service = service_fn(move |req: http::Request<Incoming>| {
            let server = server.clone();
            async move {
                let mut req = req.map(|body| body.boxed());
                req.extensions_mut().insert(ClientAddr(peer));
                Ok::<_, Infallible>(server.dispatch(req).await)
            }
        });

        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(timeouts.read_header);
        let conn = builder
            .serve_connection(TokioIo::new(io), service)
            .with_upgrades();
        let mut conn = pin!(conn);

        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(peer = %peer, error = %e, "connection error");
                }
            }
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                conn.as_mut().graceful_shutdown();
                if let Err(e) = conn.as_mut().await {
                    debug!(peer = %peer, error = %e, "connection error during shutdown");
                }
            }
        }
    }

    /// Dispatch a request through the full pipeline
    pub(crate) async fn dispatch(&self, req: HttpRequest) -> HttpResponse {
        let start = Instant::now();
        let resp = self.route(req).await;
        self.inner
            .metrics
            .record(resp.status(), start.elapsed().as_nanos() as u64);
        resp
    }

    async fn route(&self, req: HttpRequest) -> HttpResponse {
        let path = req.uri().path().to_string();

        // Bootstrap readiness gate: while deferred init is pending, only
        // liveness traffic passes. User-registered handlers for the probe
        // paths take precedence over the built-in bodies.
        if self.inner.options.deferred_init.is_some() && !self.ready() {
            match path.as_str() {
                "/healthz" if !self.inner.mux.has_exact("/healthz") => {
                    return text_response(StatusCode::OK, "ok");
                }
                "/readyz" if !self.inner.mux.has_exact("/readyz") => {
                    return text_response(StatusCode::SERVICE_UNAVAILABLE, "initializing");
                }
                "/healthz" | "/readyz" => {}
                _ => {
                    return text_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "service initializing",
                    );
                }
            }
        }

        let terminal = self
            .inner
            .mux
            .resolve(&path)
            .unwrap_or_else(|| handler_fn(|_req| async {
                text_response(StatusCode::NOT_FOUND, "404 page not found")
            }));

        let terminal = if self.inner.interceptors.is_empty() {
            terminal
        } else {
            self.inner.interceptors.wrap(terminal)
        };

        let handler = self.inner.middleware.compose(&path, terminal);
        handler(req).await
    }
}
