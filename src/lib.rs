//! keel is an HTTP routing and middleware toolkit with a graceful server lifecycle.
//!
//! Routes are registered on an [app::App], optionally through nested [group::Group]s, each
//! wrapped in the [handler::Middleware] in scope when it was registered. The finished table is
//! frozen into an [app::Dispatcher] and served by a [runner::Runner], which drains in-flight
//! requests and runs its shutdown hooks when asked to stop or when a signal arrives.

/// Macros for quality-of-life when interacting with Handlers, and crate-internal logging
#[macro_use]
pub mod macros;

/// Application-level registration, and the frozen dispatcher; outermost functionality.
pub mod app;
/// Serde-loadable configuration for the app and the runner
pub mod config;
/// The request context handed to every handler
pub mod context;
/// Process introspection routes
pub mod debug;
/// Error types that keel uses
pub mod errors;
/// Static file and directory serving
pub mod fs;
/// Route groups sharing a prefix and middleware
pub mod group;
/// Handler construction, middleware and composition
pub mod handler;
/// Path management for Routes
pub(crate) mod path;
/// Route builders and route descriptions
pub mod route;
/// Per-host route matching
pub mod router;
/// Graceful server lifecycle
pub mod runner;
/// TLS listener support
#[cfg(feature = "tls")]
pub mod tls;

use http::Response;
use std::{collections::BTreeMap, pin::Pin};

/// Params are a mapping of name -> parameter for the purposes of routing. A wildcard match is
/// stored under `*`.
pub type Params = BTreeMap<String, String>;

pub(crate) type PinBox<F> = Pin<Box<F>>;

/// HTTPResult is the return type for handlers. Return an [crate::errors::Error] to have the
/// dispatcher turn it into a response: a [http::StatusCode] with its message, or a 500 Internal
/// Server Error.
pub type HTTPResult = Result<Response<hyper::Body>, crate::errors::Error>;

/// A convenience import to gather all of `keel`'s dependencies in one easy place.
/// To use:
///
/// ```
///     use keel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        app::{App, Dispatcher},
        compose_handler,
        config::{Config, RunnerConfig},
        context::Context,
        errors::*,
        group::Group,
        handler::{compose, Handler, Middleware},
        route::{Route, RouteInfo, TypeRoutes, ALL_METHODS},
        runner::{Runner, Signal},
        HTTPResult, Params,
    };
    pub use http::{Method, Request, Response, StatusCode};
    pub use hyper::Body;
}
