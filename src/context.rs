use crate::{errors::Error, handler::Handler, HTTPResult, Params};
use http::{header, HeaderMap, Method, Request, Response, StatusCode, Uri};
use hyper::Body;

/// Context is what every [Handler] receives: the request, plus the path parameters the router
/// bound while matching it.
pub struct Context {
    req: Request<Body>,
    params: Params,
    not_found: Option<Handler>,
}

impl Context {
    pub fn new(req: Request<Body>) -> Self {
        Self {
            req,
            params: Params::default(),
            not_found: None,
        }
    }

    pub(crate) fn with_not_found(mut self, handler: Handler) -> Self {
        self.not_found = Some(handler);
        self
    }

    pub(crate) fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    pub fn request(&self) -> &Request<Body> {
        &self.req
    }

    pub fn request_mut(&mut self) -> &mut Request<Body> {
        &mut self.req
    }

    pub fn into_request(self) -> Request<Body> {
        self.req
    }

    pub fn method(&self) -> &Method {
        self.req.method()
    }

    pub fn uri(&self) -> &Uri {
        self.req.uri()
    }

    pub fn path(&self) -> &str {
        self.req.uri().path()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.req.headers()
    }

    /// The value of a request header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.req.headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// The requested host: the URI authority if the request carried one, otherwise the `Host`
    /// header. Lower-cased, port included.
    pub fn host(&self) -> Option<String> {
        self.req
            .uri()
            .authority()
            .map(|a| a.as_str().to_string())
            .or_else(|| self.header(header::HOST.as_str()).map(|h| h.to_string()))
            .map(|h| h.to_lowercase())
    }

    /// A path parameter bound by the router. The wildcard capture is stored under `*`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The first value of a query string parameter.
    pub fn query(&self, name: &str) -> Option<String> {
        let query = self.req.uri().query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// A plain-text response with the provided status.
    pub fn text<T>(&self, status: StatusCode, body: T) -> HTTPResult
    where
        T: Into<String>,
    {
        Ok(Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Body::from(body.into()))?)
    }

    /// An empty response with the provided status.
    pub fn no_content(&self, status: StatusCode) -> HTTPResult {
        Ok(Response::builder().status(status).body(Body::empty())?)
    }

    /// Redirect to `location`. The status must be a 3xx code.
    pub fn redirect(&self, status: StatusCode, location: &str) -> HTTPResult {
        if !status.is_redirection() {
            return Err(Error::new(format!("invalid redirect status code {}", status)));
        }

        Ok(Response::builder()
            .status(status)
            .header(header::LOCATION, location)
            .body(Body::empty())?)
    }

    /// Hand the request over to the dispatcher's not-found handler.
    pub async fn not_found(self) -> HTTPResult {
        match self.not_found.clone() {
            Some(handler) => handler.call(self).await,
            None => Err(Error::new_status(StatusCode::NOT_FOUND, "")),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("method", self.req.method())
            .field("uri", self.req.uri())
            .field("params", &self.params)
            .finish()
    }
}
