use crate::{
    config::Config,
    context::Context,
    errors::{Error, ServerError},
    group::Group,
    handler::{compose, Handler, Middleware},
    route::{Route, RouteInfo},
    router::{Match, Router},
};
use http::{header, Request, Response, StatusCode};
use hyper::Body;
use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

/// RouteFilter skips the registration of a route when it returns true.
pub type RouteFilter = Arc<dyn Fn(&RouteInfo) -> bool + Send + Sync>;

/// RouteModifier rewrites a route before it is registered.
pub type RouteModifier = Arc<dyn Fn(RouteInfo) -> RouteInfo + Send + Sync>;

/// App collects routes, one [Router] per host, and the middleware shared between them.
/// Registration happens here; once it is done, [App::dispatcher] produces the read-only
/// [Dispatcher] that serves requests.
///
/// ```
/// use keel::prelude::*;
///
/// # fn main() -> Result<(), ServerError> {
/// let mut app = App::new();
/// app.route("/ping")?
///     .get(Handler::new(|ctx: Context| async move { ctx.text(StatusCode::OK, "pong") }))?;
///
/// let mut api = app.group("/api")?;
/// api.route("/users/:id")?
///     .name("user")
///     .get(Handler::new(|ctx: Context| async move {
///         let id = ctx.param("id").unwrap_or_default().to_string();
///         ctx.text(StatusCode::OK, id)
///     }))?;
///
/// assert_eq!(app.routes().len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct App {
    config: Config,
    pre: Vec<Middleware>,
    middlewares: Vec<Middleware>,
    routers: HashMap<String, Router>,
    routes: Vec<RouteInfo>,
    not_found: Handler,
    filter: Option<RouteFilter>,
    modifier: Option<RouteModifier>,
}

impl Default for App {
    fn default() -> Self {
        Self::with_config(Config::default())
    }
}

fn default_not_found() -> Handler {
    Handler::new(|_ctx: Context| async { Err(Error::new_status(StatusCode::NOT_FOUND, "")) })
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            pre: Vec::new(),
            middlewares: Vec::new(),
            routers: HashMap::new(),
            routes: Vec::new(),
            not_found: default_not_found(),
            filter: None,
            modifier: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Middlewares run before routing, for every request, including those that match nothing.
    pub fn pre(&mut self, middlewares: &[Middleware]) -> &mut Self {
        self.pre.extend_from_slice(middlewares);
        self
    }

    /// Middlewares inherited by the routes and groups created from here on.
    pub fn use_middleware(&mut self, middlewares: &[Middleware]) -> &mut Self {
        self.middlewares.extend_from_slice(middlewares);
        self
    }

    /// Replace the handler used when no route matches.
    pub fn not_found(&mut self, handler: Handler) -> &mut Self {
        self.not_found = handler;
        self
    }

    pub fn route_filter<F>(&mut self, filter: F) -> &mut Self
    where
        F: Fn(&RouteInfo) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn route_modifier<F>(&mut self, modifier: F) -> &mut Self
    where
        F: Fn(RouteInfo) -> RouteInfo + Send + Sync + 'static,
    {
        self.modifier = Some(Arc::new(modifier));
        self
    }

    /// A route builder for `path`, on the default host.
    pub fn route(&mut self, path: &str) -> Result<Route<'_>, ServerError> {
        let middlewares = self.middlewares.clone();
        Route::new(self, "", path, middlewares)
    }

    /// A group of routes below `prefix`, inheriting the app's middlewares.
    pub fn group(&mut self, prefix: &str) -> Result<Group<'_>, ServerError> {
        let middlewares = self.middlewares.clone();
        Group::new(self, "", prefix, middlewares)
    }

    /// Register prebuilt routes. Each goes through [App::route], so it receives the app's
    /// middlewares like any other route.
    pub fn add_routes<I>(&mut self, routes: I) -> Result<&mut Self, ServerError>
    where
        I: IntoIterator<Item = RouteInfo>,
    {
        for ri in routes {
            self.route(&ri.path)?
                .name(&ri.name)
                .host(&ri.host)
                .method(ri.handler, &[ri.method])?;
        }

        Ok(self)
    }

    /// Register routes as one unit: if any of them is rejected, none is added.
    pub(crate) fn register(&mut self, routes: Vec<RouteInfo>) -> Result<(), ServerError> {
        let mut accepted = Vec::with_capacity(routes.len());

        for info in routes {
            if let Some(filter) = &self.filter {
                if filter(&info) {
                    debug!("route {} {}{} filtered out", info.method, info.host, info.path);
                    continue;
                }
            }

            accepted.push(match &self.modifier {
                Some(modifier) => modifier(info),
                None => info,
            });
        }

        let mut staged: HashMap<String, Router> = HashMap::new();
        for info in &accepted {
            let host = info.host.to_lowercase();
            let router = match staged.entry(host) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    let current = self.routers.get(e.key()).cloned().unwrap_or_default();
                    e.insert(current)
                }
            };

            router.add(info.method.clone(), &info.path, info.handler.clone())?;
        }

        self.routers.extend(staged);

        for info in accepted {
            debug!(
                "registered route {} {}{} (name: '{}')",
                info.method, info.host, info.path, info.name
            );
            self.routes.push(info);
        }

        Ok(())
    }

    /// The routes registered so far, in registration order.
    pub fn routes(&self) -> &[RouteInfo] {
        &self.routes
    }

    /// Snapshot the route table into a [Dispatcher].
    pub fn dispatcher(&self) -> Dispatcher {
        let routers = Arc::new(self.routers.clone());

        let routing = Handler::new(move |mut ctx: Context| {
            let routers = routers.clone();
            async move {
                let found = select_router(&routers, ctx.host().as_deref())
                    .map(|router| router.find(ctx.method(), ctx.path()))
                    .unwrap_or(Match::NotFound);

                match found {
                    Match::Found(handler, params) => {
                        ctx.set_params(params);
                        handler.call(ctx).await
                    }
                    Match::MethodNotAllowed(methods) => {
                        let allow = methods
                            .iter()
                            .map(|m| m.as_str())
                            .collect::<Vec<_>>()
                            .join(", ");

                        Ok(Response::builder()
                            .status(StatusCode::METHOD_NOT_ALLOWED)
                            .header(header::ALLOW, allow)
                            .body(Body::empty())?)
                    }
                    Match::NotFound => ctx.not_found().await,
                }
            }
        });

        Dispatcher(Arc::new(DispatcherInner {
            handler: compose(routing, &self.pre),
            not_found: self.not_found.clone(),
            routes: self.routes.clone(),
        }))
    }
}

/// Pick the router for a host: exact match first, then without the port, then the default.
fn select_router<'a>(routers: &'a HashMap<String, Router>, host: Option<&str>) -> Option<&'a Router> {
    if let Some(host) = host {
        if let Some(router) = routers.get(host) {
            return Some(router);
        }

        if let Some((name, port)) = host.rsplit_once(':') {
            if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
                if let Some(router) = routers.get(name) {
                    return Some(router);
                }
            }
        }
    }

    routers.get("")
}

struct DispatcherInner {
    handler: Handler,
    not_found: Handler,
    routes: Vec<RouteInfo>,
}

/// Dispatcher is the frozen form of an [App]: the single entry point for incoming requests.
/// Clones share the same route table.
#[derive(Clone)]
pub struct Dispatcher(Arc<DispatcherInner>);

impl Dispatcher {
    /// Route a request and run its handler chain. Errors are turned into responses here; a
    /// failing handler only affects its own request.
    pub async fn dispatch(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let ctx = Context::new(req).with_not_found(self.0.not_found.clone());

        match self.0.handler.call(ctx).await {
            Ok(res) => res,
            Err(e) => {
                if e.status().is_server_error() {
                    error!("{} {}: {}", method, path, e);
                } else {
                    debug!("{} {}: {}", method, path, e);
                }
                e.into_response()
            }
        }
    }

    pub fn routes(&self) -> &[RouteInfo] {
        &self.0.routes
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.0.routes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use std::sync::Mutex;

    fn text(body: &'static str) -> Handler {
        Handler::new(move |ctx: Context| async move { ctx.text(StatusCode::OK, body) })
    }

    fn request(method: Method, uri: &str, host: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(host) = host {
            builder = builder.header(header::HOST, host);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body(res: Response<Body>) -> String {
        String::from_utf8(hyper::body::to_bytes(res.into_body()).await.unwrap().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_params() {
        let mut app = App::new();
        app.route("/users/:id")
            .unwrap()
            .get(Handler::new(|ctx: Context| async move {
                let id = ctx.param("id").unwrap_or_default().to_string();
                ctx.text(StatusCode::OK, id)
            }))
            .unwrap();
        app.route("/users/list").unwrap().get(text("list")).unwrap();

        let d = app.dispatcher();
        assert_eq!(body(d.dispatch(request(Method::GET, "/users/42", None)).await).await, "42");
        assert_eq!(
            body(d.dispatch(request(Method::GET, "/users/list", None)).await).await,
            "list"
        );
    }

    #[tokio::test]
    async fn test_dispatch_not_found_and_not_allowed() {
        let mut app = App::new();
        app.route("/things/:id")
            .unwrap()
            .get(text("get"))
            .unwrap()
            .put(text("put"))
            .unwrap();

        let d = app.dispatcher();

        let res = d.dispatch(request(Method::POST, "/things/1", None)).await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.headers()[header::ALLOW], "GET, PUT");

        let res = d.dispatch(request(Method::GET, "/nothing", None)).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        app.not_found(Handler::new(|ctx: Context| async move {
            ctx.text(StatusCode::NOT_FOUND, "custom")
        }));
        let res = app
            .dispatcher()
            .dispatch(request(Method::GET, "/nothing", None))
            .await;
        assert_eq!(body(res).await, "custom");
    }

    #[tokio::test]
    async fn test_dispatch_hosts() {
        let mut app = App::new();
        app.route("/").unwrap().get(text("default")).unwrap();
        app.route("/")
            .unwrap()
            .host("Example.com")
            .get(text("example"))
            .unwrap();

        let d = app.dispatcher();
        let cases = [
            (Some("example.com"), "example"),
            (Some("EXAMPLE.com:8080"), "example"),
            (Some("other.com"), "default"),
            (None, "default"),
        ];

        for (host, expected) in cases {
            let res = d.dispatch(request(Method::GET, "/", host)).await;
            assert_eq!(body(res).await, expected, "{:?}", host);
        }

        // a host-specific router does not fall back to the default one
        let res = d
            .dispatch(request(Method::GET, "/missing", Some("example.com")))
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dispatch_errors() {
        let mut app = App::new();
        app.route("/fail")
            .unwrap()
            .get(Handler::new(|_ctx: Context| async {
                Err(Error::new("database unavailable"))
            }))
            .unwrap();
        app.route("/teapot")
            .unwrap()
            .get(Handler::new(|_ctx: Context| async {
                Err(Error::new_status(StatusCode::IM_A_TEAPOT, "short and stout"))
            }))
            .unwrap();

        let d = app.dispatcher();
        let res = d.dispatch(request(Method::GET, "/fail", None)).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(res).await, "database unavailable");

        let res = d.dispatch(request(Method::GET, "/teapot", None)).await;
        assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn test_dispatch_pre_middleware() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = {
            let seen = seen.clone();
            Middleware::new(move |next: Handler| {
                let seen = seen.clone();
                Handler::new(move |ctx: Context| {
                    seen.lock().unwrap().push(ctx.path().to_string());
                    next.call(ctx)
                })
            })
        };

        let mut app = App::new();
        app.pre(&[record]);
        app.route("/a").unwrap().get(text("a")).unwrap();

        let d = app.dispatcher();
        d.dispatch(request(Method::GET, "/a", None)).await;
        d.dispatch(request(Method::GET, "/b", None)).await;

        assert_eq!(*seen.lock().unwrap(), vec!["/a", "/b"]);
    }

    #[tokio::test]
    async fn test_filter_and_modifier() {
        let mut app = App::new();
        app.route_filter(|ri: &RouteInfo| ri.path.starts_with("/internal"))
            .route_modifier(|mut ri: RouteInfo| {
                ri.name = format!("public_{}", ri.name);
                ri
            });

        app.route("/internal/x").unwrap().get(text("x")).unwrap();
        app.route("/y").unwrap().name("y").get(text("y")).unwrap();

        assert_eq!(app.routes().len(), 1);
        assert_eq!(app.routes()[0].name, "public_y");

        let d = app.dispatcher();
        assert_eq!(d.routes().len(), 1);
        assert_eq!(
            d.dispatch(request(Method::GET, "/internal/x", None))
                .await
                .status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_add_routes() {
        let mut app = App::new();
        app.add_routes(vec![
            RouteInfo::new("a", "/a", Method::GET, text("a")),
            RouteInfo::new("a", "/a", Method::POST, text("a-post")),
        ])
        .unwrap();

        assert!(app
            .add_routes(vec![RouteInfo::new("dup", "/a", Method::GET, text("dup"))])
            .is_err());

        let res = app
            .dispatcher()
            .dispatch(request(Method::POST, "/a", None))
            .await;
        assert_eq!(body(res).await, "a-post");
    }
}
