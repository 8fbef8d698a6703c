use crate::{
    app::App,
    context::Context,
    errors::{Error, ServerError},
    fs::{self, FileSystem},
    handler::{compose, Handler, Middleware},
    path::Path,
};
use http::{Method, StatusCode};
use serde::{Serialize, Serializer};
use std::{path::PathBuf, sync::Arc};

/// AllMethods represents all HTTP methods, as registered by [Route::any].
pub const ALL_METHODS: [Method; 9] = [
    Method::CONNECT,
    Method::HEAD,
    Method::OPTIONS,
    Method::TRACE,
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
];

/// RouteInfo describes one registered (host, path, method) combination.
#[derive(Clone, Debug, Serialize)]
pub struct RouteInfo {
    pub name: String,
    pub host: String,
    pub path: String,
    #[serde(serialize_with = "serialize_method")]
    pub method: Method,
    #[serde(skip)]
    pub handler: Handler,
}

impl RouteInfo {
    pub fn new(name: &str, path: &str, method: Method, handler: Handler) -> Self {
        Self {
            name: name.to_string(),
            host: String::new(),
            path: path.to_string(),
            method,
            handler,
        }
    }
}

fn serialize_method<S>(method: &Method, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(method.as_str())
}

/// A header the request must carry, optionally with one of a set of values.
#[derive(Clone, Debug)]
struct HeaderPredicate {
    key: String,
    values: Vec<String>,
}

/// TypeRoutes is a table of named handlers belonging to one resource type, registered in bulk by
/// [Route::map_type]. The HTTP method of each handler comes from
/// [crate::config::Config::method_mapping].
#[derive(Clone, Debug, Default)]
pub struct TypeRoutes {
    name: String,
    handlers: Vec<(String, Handler)>,
}

impl TypeRoutes {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            handlers: Vec::new(),
        }
    }

    /// Add a handler under a method name such as `Create` or `Get`.
    pub fn handler(mut self, method_name: &str, handler: Handler) -> Self {
        self.handlers.push((method_name.to_string(), handler));
        self
    }
}

/// Route is a builder for one path. Mutators (`name`, `host`, `use_middleware`, ...) only change
/// the builder; the method calls (`get`, `method`, `any`, ...) register what the builder holds at
/// that moment, so later mutations do not reach routes that were already registered.
pub struct Route<'a> {
    app: &'a mut App,
    host: String,
    path: String,
    name: String,
    middlewares: Vec<Middleware>,
    headers: Vec<HeaderPredicate>,
}

impl<'a> Route<'a> {
    pub(crate) fn new(
        app: &'a mut App,
        prefix: &str,
        path: &str,
        middlewares: Vec<Middleware>,
    ) -> Result<Self, ServerError> {
        if path.is_empty() {
            return Err(ServerError::new("the route path must not be empty"));
        } else if !path.starts_with('/') {
            return Err(ServerError(format!("path '{}' must start with '/'", path)));
        }

        Ok(Self {
            app,
            host: String::new(),
            path: format!("{}{}", prefix.trim_end_matches('/'), path),
            name: String::new(),
            middlewares,
            headers: Vec::new(),
        })
    }

    /// The full path of the route, including any group prefix.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Clear all the middlewares inherited so far.
    pub fn no_middlewares(&mut self) -> &mut Self {
        self.middlewares.clear();
        self
    }

    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = name.to_string();
        self
    }

    /// Restrict the route to a host. Empty means the default host.
    pub fn host(&mut self, host: &str) -> &mut Self {
        self.host = host.to_lowercase();
        self
    }

    pub fn use_middleware(&mut self, middlewares: &[Middleware]) -> &mut Self {
        self.middlewares.extend_from_slice(middlewares);
        self
    }

    /// Require the request to carry the header `key`. If `values` is not empty, the header must
    /// also equal one of them. Rejected requests fail with 400 Bad Request.
    ///
    /// Predicates are checked in the order they were added. A predicate with values accepts the
    /// request as soon as its header matches, without looking at the predicates after it.
    pub fn has_header(&mut self, key: &str, values: &[&str]) -> &mut Self {
        self.headers.push(HeaderPredicate {
            key: key.to_lowercase(),
            values: values.iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    fn header_middleware(&self) -> Option<Middleware> {
        if self.headers.is_empty() {
            return None;
        }

        let headers = Arc::new(self.headers.clone());

        Some(Middleware::new(move |next: Handler| {
            let headers = headers.clone();
            Handler::new(move |ctx: Context| {
                let headers = headers.clone();
                let next = next.clone();
                async move {
                    for kv in headers.iter() {
                        let value = ctx.header(&kv.key).unwrap_or_default();
                        if kv.values.is_empty() {
                            if value.is_empty() {
                                return Err(Error::bad_request(format!(
                                    "missing the header '{}'",
                                    kv.key
                                )));
                            }
                        } else if kv.values.iter().any(|v| v == value) {
                            return next.call(ctx).await;
                        } else {
                            return Err(Error::bad_request(format!(
                                "invalid header '{}: {}'",
                                kv.key, value
                            )));
                        }
                    }

                    next.call(ctx).await
                }
            })
        }))
    }

    fn add_route(
        &mut self,
        name: &str,
        path: &str,
        handler: Handler,
        methods: &[Method],
    ) -> Result<&mut Self, ServerError> {
        if methods.is_empty() {
            return Err(ServerError::new("the route requires methods"));
        }

        Path::new(path)?;

        let mut middlewares = self.middlewares.clone();
        if let Some(m) = self.header_middleware() {
            middlewares.push(m);
        }

        let max = self.app.config().middleware_max;
        if middlewares.len() > max {
            return Err(ServerError(format!(
                "the number of middlewares '{}' has exceeded the maximum '{}'",
                middlewares.len(),
                max
            )));
        }

        let handler = compose(handler, &middlewares);

        let routes = methods
            .iter()
            .map(|method| RouteInfo {
                name: name.to_string(),
                host: self.host.clone(),
                path: path.to_string(),
                method: method.clone(),
                handler: handler.clone(),
            })
            .collect();

        self.app.register(routes)?;
        Ok(self)
    }

    /// Register the handler for the given methods.
    pub fn method(&mut self, handler: Handler, methods: &[Method]) -> Result<&mut Self, ServerError> {
        let (name, path) = (self.name.clone(), self.path.clone());
        self.add_route(&name, &path, handler, methods)
    }

    /// Register the handler for every method in [ALL_METHODS].
    pub fn any(&mut self, handler: Handler) -> Result<&mut Self, ServerError> {
        self.method(handler, &ALL_METHODS)
    }

    pub fn get(&mut self, handler: Handler) -> Result<&mut Self, ServerError> {
        self.method(handler, &[Method::GET])
    }

    pub fn post(&mut self, handler: Handler) -> Result<&mut Self, ServerError> {
        self.method(handler, &[Method::POST])
    }

    pub fn put(&mut self, handler: Handler) -> Result<&mut Self, ServerError> {
        self.method(handler, &[Method::PUT])
    }

    pub fn delete(&mut self, handler: Handler) -> Result<&mut Self, ServerError> {
        self.method(handler, &[Method::DELETE])
    }

    pub fn patch(&mut self, handler: Handler) -> Result<&mut Self, ServerError> {
        self.method(handler, &[Method::PATCH])
    }

    pub fn head(&mut self, handler: Handler) -> Result<&mut Self, ServerError> {
        self.method(handler, &[Method::HEAD])
    }

    pub fn options(&mut self, handler: Handler) -> Result<&mut Self, ServerError> {
        self.method(handler, &[Method::OPTIONS])
    }

    pub fn connect(&mut self, handler: Handler) -> Result<&mut Self, ServerError> {
        self.method(handler, &[Method::CONNECT])
    }

    pub fn trace(&mut self, handler: Handler) -> Result<&mut Self, ServerError> {
        self.method(handler, &[Method::TRACE])
    }

    /// Register a set of handlers, one per method.
    pub fn map<I>(&mut self, method2handlers: I) -> Result<&mut Self, ServerError>
    where
        I: IntoIterator<Item = (Method, Handler)>,
    {
        for (method, handler) in method2handlers {
            self.method(handler, &[method])?;
        }
        Ok(self)
    }

    /// Register the handlers of a [TypeRoutes] table below the route's path.
    ///
    /// A table named `User` with a `Create` handler becomes `<path>/user/create`, named
    /// `user_create`, using the method `Create` maps to. Handlers whose name has no mapping are
    /// skipped.
    pub fn map_type(&mut self, routes: &TypeRoutes) -> Result<&mut Self, ServerError> {
        let prefix = if self.path == "/" {
            String::new()
        } else {
            self.path.clone()
        };
        let type_name = routes.name.to_lowercase();

        for (method_name, handler) in &routes.handlers {
            let Some(method) = self.app.config().method_mapping.get(method_name).cloned() else {
                debug!("no method mapping for {}.{}, skipping", routes.name, method_name);
                continue;
            };

            let method = Method::from_bytes(method.as_bytes()).map_err(|_| {
                ServerError(format!(
                    "invalid method '{}' mapped for '{}'",
                    method, method_name
                ))
            })?;

            let lower = method_name.to_lowercase();
            let path = format!("{}/{}/{}", prefix, type_name, lower);
            let name = format!("{}_{}", type_name, lower);
            self.add_route(&name, &path, handler.clone(), &[method])?;
        }

        Ok(self)
    }

    /// Redirect requests to `to_url` with the given 3xx status. The method defaults to GET.
    pub fn redirect(
        &mut self,
        code: StatusCode,
        to_url: &str,
        method: Option<Method>,
    ) -> Result<&mut Self, ServerError> {
        if !code.is_redirection() {
            return Err(ServerError(format!("invalid redirect status code {}", code)));
        }

        let to_url = to_url.to_string();
        self.method(
            Handler::new(move |ctx: Context| {
                let to_url = to_url.clone();
                async move { ctx.redirect(code, &to_url) }
            }),
            &[method.unwrap_or(Method::GET)],
        )
    }

    fn check_static(&self) -> Result<(), ServerError> {
        if self.path.contains(':') || self.path.contains('*') {
            return Err(ServerError::new(
                "URL parameters cannot be used when serving a static file",
            ));
        }
        Ok(())
    }

    /// Serve a single file: GET downloads it, HEAD reports its length and ETag.
    pub fn static_file<P>(&mut self, file_path: P) -> Result<&mut Self, ServerError>
    where
        P: Into<PathBuf>,
    {
        self.check_static()?;
        let file_path = file_path.into();
        let path = self.path.clone();

        self.add_route("", &path, fs::file_handler(file_path.clone()), &[Method::GET])?;
        self.add_route("", &path, fs::file_metadata_handler(file_path), &[Method::HEAD])
    }

    /// Serve the contents of a [FileSystem] below the route's path, for GET and HEAD.
    pub fn static_fs<F>(&mut self, filesystem: F) -> Result<&mut Self, ServerError>
    where
        F: FileSystem,
    {
        self.check_static()?;

        let path = if self.path == "/" {
            "/*".to_string()
        } else {
            format!("{}/*", self.path.trim_end_matches('/'))
        };

        self.add_route(
            "",
            &path,
            fs::fs_handler(Arc::new(filesystem)),
            &[Method::HEAD, Method::GET],
        )
    }

    /// Serve a directory from disk. Directory listings are never produced.
    pub fn static_dir<P>(&mut self, dir: P) -> Result<&mut Self, ServerError>
    where
        P: Into<PathBuf>,
    {
        self.static_fs(fs::OnlyFiles::new(fs::Dir::new(dir)))
    }
}
