//! Process introspection routes under `/debug/pprof/`.
//!
//! The crate does not profile anything itself. Applications register named [Profile]s (heap
//! dumps, CPU samples, traces) and [route_infos] exposes them over HTTP, ready for
//! [crate::app::App::add_routes].
use crate::{context::Context, handler::Handler, route::RouteInfo, HTTPResult};
use http::{header, Method, Response, StatusCode};
use hyper::Body;
use std::{collections::BTreeMap, io, sync::Arc};

const PREFIX: &str = "/debug/pprof";

/// Profile writes one snapshot of some runtime data. A non-zero `debug` asks for a human
/// readable rendition.
pub trait Profile: Send + Sync + 'static {
    fn write_to(&self, out: &mut Vec<u8>, debug: i32) -> io::Result<()>;
}

impl<F> Profile for F
where
    F: Fn(&mut Vec<u8>, i32) -> io::Result<()> + Send + Sync + 'static,
{
    fn write_to(&self, out: &mut Vec<u8>, debug: i32) -> io::Result<()> {
        self(out, debug)
    }
}

/// Profiles is the set of named profiles the debug routes can serve.
#[derive(Clone, Default)]
pub struct Profiles {
    profiles: BTreeMap<String, Arc<dyn Profile>>,
    collect: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Profiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a profile served at `/debug/pprof/<name>`. The names `profile`, `symbol` and `trace`
    /// also back the dedicated routes of the same name.
    pub fn register<P>(mut self, name: &str, profile: P) -> Self
    where
        P: Profile,
    {
        self.profiles.insert(name.to_string(), Arc::new(profile));
        self
    }

    /// Run `f` before a `heap` snapshot requested with `?gc=1` or higher.
    pub fn on_collect<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.collect = Some(Arc::new(f));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    fn serve(&self, name: &str, ctx: &Context) -> HTTPResult {
        let Some(profile) = self.profiles.get(name) else {
            return Ok(Response::builder()
                .status(StatusCode::NOT_FOUND)
                .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
                .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(Body::from("Unknown profile\n"))?);
        };

        let flag = |key: &str| {
            ctx.query(key)
                .and_then(|v| v.parse::<i32>().ok())
                .unwrap_or(0)
        };

        if name == "heap" && flag("gc") > 0 {
            if let Some(collect) = &self.collect {
                collect();
            }
        }

        let debug = flag("debug");
        let mut out = Vec::new();
        profile.write_to(&mut out, debug)?;

        let builder = Response::builder().header(header::X_CONTENT_TYPE_OPTIONS, "nosniff");
        let builder = if debug != 0 {
            builder.header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        } else {
            builder
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .header(
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", name),
                )
        };

        Ok(builder.body(Body::from(out))?)
    }

    fn index(&self) -> HTTPResult {
        let mut html = String::from(
            "<html>\n<head><title>/debug/pprof/</title></head>\n<body>\n/debug/pprof/<br>\n<br>\nprofiles:<br>\n<ul>\n",
        );
        for name in self.profiles.keys() {
            html.push_str(&format!(
                "<li><a href=\"{0}?debug=1\">{0}</a></li>\n",
                name
            ));
        }
        html.push_str("<li><a href=\"cmdline\">cmdline</a></li>\n</ul>\n</body>\n</html>\n");

        Ok(Response::builder()
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .body(Body::from(html))?)
    }
}

impl std::fmt::Debug for Profiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiles")
            .field("profiles", &self.names())
            .finish()
    }
}

/// The command line of the process, arguments separated by NUL bytes.
fn cmdline() -> HTTPResult {
    let args: Vec<String> = std::env::args().collect();
    Ok(Response::builder()
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(args.join("\x00")))?)
}

fn named(profiles: &Arc<Profiles>, name: &'static str) -> Handler {
    let profiles = profiles.clone();
    Handler::new(move |ctx: Context| {
        let profiles = profiles.clone();
        async move { profiles.serve(name, &ctx) }
    })
}

/// The introspection routes: an index at `/debug/pprof/`, any registered profile at
/// `/debug/pprof/<name>`, and the dedicated `cmdline`, `profile`, `symbol` and `trace` routes.
///
/// ```
/// use keel::{debug, prelude::*};
///
/// # fn main() -> Result<(), ServerError> {
/// let profiles = debug::Profiles::new().register("heap", |out: &mut Vec<u8>, _debug: i32| -> std::io::Result<()> {
///     out.extend_from_slice(b"heap snapshot");
///     Ok(())
/// });
///
/// let mut app = App::new();
/// app.add_routes(debug::route_infos(profiles))?;
/// assert_eq!(app.routes().len(), 6);
/// # Ok(())
/// # }
/// ```
pub fn route_infos(profiles: Profiles) -> Vec<RouteInfo> {
    let profiles = Arc::new(profiles);

    let index = {
        let profiles = profiles.clone();
        Handler::new(move |ctx: Context| {
            let profiles = profiles.clone();
            async move {
                match ctx.param(crate::path::WILDCARD).unwrap_or_default() {
                    "" => profiles.index(),
                    name => profiles.serve(name, &ctx),
                }
            }
        })
    };

    vec![
        RouteInfo::new("pprof_index", &format!("{}/*", PREFIX), Method::GET, index),
        RouteInfo::new(
            "pprof_cmdline",
            &format!("{}/cmdline", PREFIX),
            Method::GET,
            Handler::new(|_ctx: Context| async { cmdline() }),
        ),
        RouteInfo::new(
            "pprof_profile",
            &format!("{}/profile", PREFIX),
            Method::GET,
            named(&profiles, "profile"),
        ),
        RouteInfo::new(
            "pprof_symbol",
            &format!("{}/symbol", PREFIX),
            Method::GET,
            named(&profiles, "symbol"),
        ),
        RouteInfo::new(
            "pprof_symbol",
            &format!("{}/symbol", PREFIX),
            Method::POST,
            named(&profiles, "symbol"),
        ),
        RouteInfo::new(
            "pprof_trace",
            &format!("{}/trace", PREFIX),
            Method::GET,
            named(&profiles, "trace"),
        ),
    ]
}
