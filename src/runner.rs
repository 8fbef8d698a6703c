//! Graceful server lifecycle.
//!
//! A [Runner] goes through `Created -> Running -> ShuttingDown -> Stopped`. It serves a
//! [Dispatcher] until a configured signal arrives, [Runner::stop] is called, or the listener
//! fails. Then it drains in-flight requests, runs the shutdown hooks newest first, and releases
//! everyone blocked in [Runner::wait].
use crate::{
    app::Dispatcher,
    config::{RunnerConfig, TlsConfig},
    errors::ServerError,
};
use hyper::{
    server::conn::AddrIncoming,
    service::{make_service_fn, service_fn},
    Server,
};
use serde::{Deserialize, Serialize};
use std::{
    convert::Infallible,
    future::Future,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::{
    net::TcpListener,
    sync::{watch, OnceCell},
};

/// Signals that can trigger a graceful shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Interrupt,
    Terminate,
    Quit,
    Abort,
    Hangup,
}

impl Signal {
    /// Interrupt, terminate, quit and abort.
    pub fn defaults() -> Vec<Self> {
        vec![Self::Interrupt, Self::Terminate, Self::Quit, Self::Abort]
    }

    #[cfg(unix)]
    fn kind(self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;

        match self {
            Self::Interrupt => SignalKind::interrupt(),
            Self::Terminate => SignalKind::terminate(),
            Self::Quit => SignalKind::quit(),
            Self::Abort => SignalKind::from_raw(6),
            Self::Hangup => SignalKind::hangup(),
        }
    }
}

struct Signals {
    #[cfg(unix)]
    streams: Vec<(Signal, tokio::signal::unix::Signal)>,
    #[cfg(not(unix))]
    interrupt: bool,
}

impl Signals {
    #[cfg(unix)]
    fn listen(signals: &[Signal]) -> std::io::Result<Self> {
        let mut streams = Vec::new();
        for signal in signals {
            if streams.iter().any(|(s, _)| s == signal) {
                continue;
            }
            streams.push((*signal, tokio::signal::unix::signal(signal.kind())?));
        }

        Ok(Self { streams })
    }

    #[cfg(unix)]
    async fn recv(&mut self) -> Signal {
        if self.streams.is_empty() {
            return std::future::pending().await;
        }

        std::future::poll_fn(|cx| {
            for (signal, stream) in self.streams.iter_mut() {
                if stream.poll_recv(cx).is_ready() {
                    return std::task::Poll::Ready(*signal);
                }
            }
            std::task::Poll::Pending
        })
        .await
    }

    #[cfg(not(unix))]
    fn listen(signals: &[Signal]) -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signals.contains(&Signal::Interrupt),
        })
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> Signal {
        if self.interrupt && tokio::signal::ctrl_c().await.is_ok() {
            return Signal::Interrupt;
        }
        std::future::pending().await
    }
}

/// The lifecycle state of a [Runner].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// OnceRunner runs a function at most once. Concurrent callers of [OnceRunner::run] all return
/// after that single execution has finished.
pub struct OnceRunner {
    f: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    done: OnceCell<()>,
}

impl OnceRunner {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            f: Mutex::new(Some(Box::new(f))),
            done: OnceCell::new(),
        }
    }

    pub async fn run(&self) {
        self.done
            .get_or_init(|| async {
                let f = lock(&self.f).take();
                if let Some(f) = f {
                    f()
                }
            })
            .await;
    }

    pub fn is_done(&self) -> bool {
        self.done.initialized()
    }
}

macro_rules! make_service {
    ($dispatcher:expr) => {{
        let dispatcher = $dispatcher;
        make_service_fn(move |_| {
            let dispatcher = dispatcher.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let dispatcher = dispatcher.clone();
                    async move { Ok::<_, Infallible>(dispatcher.dispatch(req).await) }
                }))
            }
        })
    }};
}

/// Runner is an HTTP server runner. Share it through an [Arc] to stop it from another task.
///
/// ```no_run
/// use keel::prelude::*;
/// use std::sync::Arc;
///
/// # async fn run(app: App) -> Result<(), ServerError> {
/// let runner = Arc::new(Runner::new("api", app.dispatcher()));
/// runner.register_on_shutdown(|| println!("closing the database"));
/// runner.start("127.0.0.1:8080").await?;
/// runner.wait().await;
/// # Ok(())
/// # }
/// ```
pub struct Runner {
    config: RunnerConfig,
    dispatcher: Dispatcher,
    hooks: Mutex<Vec<Arc<OnceRunner>>>,
    state: watch::Sender<State>,
    graceful: watch::Sender<bool>,
    served: watch::Sender<bool>,
    shut: OnceCell<()>,
    stopped: OnceCell<()>,
    local_addr: Mutex<Option<SocketAddr>>,
    serve_error: Arc<Mutex<Option<String>>>,
}

impl Runner {
    pub fn new(name: &str, dispatcher: Dispatcher) -> Self {
        Self::with_config(
            RunnerConfig {
                name: name.to_string(),
                ..Default::default()
            },
            dispatcher,
        )
    }

    pub fn with_config(config: RunnerConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher,
            hooks: Mutex::new(Vec::new()),
            state: watch::channel(State::Created).0,
            graceful: watch::channel(false).0,
            served: watch::channel(false).0,
            shut: OnceCell::new(),
            stopped: OnceCell::new(),
            local_addr: Mutex::new(None),
            serve_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// The address the listener is bound to, once it is.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    fn label(&self) -> String {
        if self.config.name.is_empty() {
            "The HTTP Server".to_string()
        } else {
            format!("The HTTP Server [{}]", self.config.name)
        }
    }

    /// Register functions to run when the server shuts down. They run in reverse order of
    /// registration, each at most once.
    pub fn register_on_shutdown<F>(&self, f: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        lock(&self.hooks).push(Arc::new(OnceRunner::new(f)));
        self
    }

    /// Serve on `addr` until shut down, using TLS if the configuration names certificate files.
    /// Returns once the server has stopped and the shutdown hooks have run.
    pub async fn start(&self, addr: &str) -> Result<(), ServerError> {
        let tls = self.config.tls.clone();
        self.run(addr, tls).await
    }

    /// The same as [Runner::start], serving TLS with the given PEM files.
    pub async fn start_tls<C, K>(&self, addr: &str, cert_file: C, key_file: K) -> Result<(), ServerError>
    where
        C: Into<PathBuf>,
        K: Into<PathBuf>,
    {
        let tls = TlsConfig {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
        };
        self.run(addr, Some(tls)).await
    }

    async fn run(&self, addr: &str, tls: Option<TlsConfig>) -> Result<(), ServerError> {
        if let Some(preset) = &self.config.addr {
            if preset != addr {
                return Err(ServerError(format!(
                    "the runner address is set to '{}', not '{}'",
                    preset, addr
                )));
            }
        }

        let mut started = false;
        self.state.send_if_modified(|state| {
            if *state == State::Created {
                *state = State::Running;
                started = true;
            }
            started
        });

        if !started {
            return Err(ServerError::new("the runner has already been started"));
        }

        self.register_shutdown_log();

        let result = self.serve(addr, tls).await;
        if let Err(e) = &result {
            *lock(&self.serve_error) = Some(e.to_string());
        }

        self.served.send_replace(true);
        self.stop().await;
        result
    }

    fn register_shutdown_log(&self) {
        let label = self.label();
        let serve_error = self.serve_error.clone();

        self.register_on_shutdown(move || match lock(&serve_error).take() {
            None => info!("{} is shutdown", label),
            Some(e) => error!("{} is shutdown: {}", label, e),
        });
    }

    async fn serve(&self, addr: &str, tls: Option<TlsConfig>) -> Result<(), ServerError> {
        let signals = Signals::listen(&self.config.signals)?;
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        *lock(&self.local_addr) = Some(local);

        let mut graceful = self.graceful.subscribe();
        let drain = async move {
            let _ = graceful.wait_for(|stop| *stop).await;
        };

        info!("{} is running on {}", self.label(), local);
        let dispatcher = self.dispatcher.clone();

        match tls {
            None => {
                let incoming = AddrIncoming::from_listener(listener)?;
                let server = Server::builder(incoming)
                    .serve(make_service!(dispatcher))
                    .with_graceful_shutdown(drain);
                self.supervise(server, signals).await
            }
            #[cfg(feature = "tls")]
            Some(tls) => {
                let incoming = crate::tls::incoming(listener, crate::tls::acceptor(&tls)?);
                let server = Server::builder(incoming)
                    .serve(make_service!(dispatcher))
                    .with_graceful_shutdown(drain);
                self.supervise(server, signals).await
            }
            #[cfg(not(feature = "tls"))]
            Some(tls) => {
                drop((listener, drain, dispatcher, signals));
                Err(ServerError(format!(
                    "cannot serve TLS with '{}' and '{}': built without the `tls` feature",
                    tls.cert_file.display(),
                    tls.key_file.display()
                )))
            }
        }
    }

    /// Drive the server until it finishes draining, or until the hooks have run because a
    /// shutdown deadline passed. A signal starts the same shutdown as [Runner::stop].
    async fn supervise<F>(&self, server: F, mut signals: Signals) -> Result<(), ServerError>
    where
        F: Future<Output = Result<(), hyper::Error>>,
    {
        tokio::pin!(server);

        tokio::select! {
            res = &mut server => return Ok(res?),
            _ = self.wait() => return Ok(()),
            signal = signals.recv() => {
                info!("{}: received {:?}, shutting down", self.label(), signal);
            }
        }

        // stop() only returns early here when the deadline passes; a finished drain wins the
        // race and [Runner::run] completes the shutdown.
        tokio::select! {
            res = &mut server => res?,
            _ = self.stop() => {}
        }

        Ok(())
    }

    /// Stop accepting connections, wait for in-flight requests (at most `timeout`, if given),
    /// then run the shutdown hooks. Fails if the server was never started, or if draining did
    /// not finish in time; the hooks run either way.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> Result<(), ServerError> {
        if self.state() == State::Created {
            return Err(ServerError::new("the server has not been started"));
        }

        self.state.send_if_modified(|state| {
            if *state == State::Running {
                *state = State::ShuttingDown;
                true
            } else {
                false
            }
        });
        self.graceful.send_replace(true);

        let mut served = self.served.subscribe();
        let drained = async move {
            let _ = served.wait_for(|done| *done).await;
        };

        let result = match timeout {
            Some(t) => tokio::time::timeout(t, drained).await.map_err(|_| {
                ServerError(format!("the server did not shut down within {:?}", t))
            }),
            None => {
                drained.await;
                Ok(())
            }
        };

        self.run_hooks().await;
        result
    }

    /// Shut down with the configured timeout. Safe to call any number of times from any task;
    /// the shutdown happens once. Does nothing if the runner was never started.
    pub async fn stop(&self) {
        if self.state() == State::Created {
            debug!("{}: stop requested before start, ignoring", self.label());
            return;
        }

        self.shut
            .get_or_init(|| async {
                if let Err(e) = self.shutdown(self.config.shutdown_timeout()).await {
                    warn!("{}: {}", self.label(), e);
                }
            })
            .await;
    }

    async fn run_hooks(&self) {
        self.stopped
            .get_or_init(|| async {
                let hooks = lock(&self.hooks).clone();
                for hook in hooks.iter().rev() {
                    hook.run().await;
                }
                self.state.send_replace(State::Stopped);
            })
            .await;
    }

    /// Wait until every shutdown hook has finished.
    pub async fn wait(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == State::Stopped).await;
    }
}
