use anyhow::anyhow;
use http::{Response, StatusCode};
use hyper::Body;

/// An error for server-related issues: route table construction, configuration and listener
/// setup. These are raised before or while the server comes up, and the caller decides whether
/// they are fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError(pub String);

impl ServerError {
    pub fn new<T>(message: T) -> Self
    where
        T: ToString,
    {
        Self(message.to_string())
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<std::net::AddrParseError> for ServerError {
    fn from(value: std::net::AddrParseError) -> Self {
        Self(value.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(value: std::io::Error) -> Self {
        Self(value.to_string())
    }
}

impl From<hyper::Error> for ServerError {
    fn from(value: hyper::Error) -> Self {
        Self(value.to_string())
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(value: serde_json::Error) -> Self {
        Self(format!("invalid configuration: {}", value))
    }
}

impl From<String> for ServerError {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ServerError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::error::Error for ServerError {}

/// General errors for keel handlers. Yield either a StatusCode for a literal status, or a
/// String for a 500 Internal Server Error. Successful responses of any status should be yielded
/// through [http::Response] returns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    StatusCode(StatusCode, String),
    InternalServerError(String),
}

impl Default for Error {
    fn default() -> Self {
        Self::InternalServerError("internal server error".to_string())
    }
}

impl Error {
    /// Convenience method to pass anything in that accepts a .to_string method.
    pub fn new<T>(message: T) -> Self
    where
        T: ToString,
    {
        Self::InternalServerError(message.to_string())
    }

    /// A convenient way to return status codes with optional informational bodies.
    pub fn new_status<T>(error: StatusCode, message: T) -> Self
    where
        T: ToString,
    {
        Self::StatusCode(error, message.to_string())
    }

    /// Shorthand for a 400 Bad Request.
    pub fn bad_request<T>(message: T) -> Self
    where
        T: ToString,
    {
        Self::new_status(StatusCode::BAD_REQUEST, message)
    }

    /// The status this error resolves to when it reaches the client.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::StatusCode(code, _) => *code,
            Self::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::StatusCode(_, message) => message,
            Self::InternalServerError(message) => message,
        }
    }

    /// Converts the error into a response. The body carries the message as plain text.
    pub fn into_response(self) -> Response<Body> {
        let status = self.status();
        let message = match self {
            Self::StatusCode(_, message) => message,
            Self::InternalServerError(message) => message,
        };

        let mut builder = Response::builder().status(status);
        if !message.is_empty() {
            builder = builder.header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8");
        }

        builder.body(Body::from(message)).unwrap_or_else(|_| {
            let mut res = Response::new(Body::empty());
            *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            res
        })
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StatusCode(code, message) => f.write_str(&format!("{}: {}", code, message)),
            Self::InternalServerError(ise) => f.write_str(&format!("Error: {}", ise)),
        }
    }
}

impl<T> From<T> for Error
where
    T: std::error::Error,
{
    fn from(value: T) -> Self {
        Self::new(value.to_string())
    }
}

impl From<Error> for anyhow::Error {
    fn from(value: Error) -> Self {
        anyhow!(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status() {
        let err = Error::bad_request("missing the header 'x-key'");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "missing the header 'x-key'");

        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire").into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Error: disk on fire");

        assert_eq!(
            Error::default().into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_error_into_response() {
        let res = Error::new_status(StatusCode::FORBIDDEN, "nope").into_response();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
        assert_eq!(&body[..], b"nope");
    }

    #[test]
    fn test_server_error_conversions() {
        let err: ServerError = "127.0.0.1:x".parse::<std::net::SocketAddr>().unwrap_err().into();
        assert!(!err.0.is_empty());
        assert_eq!(ServerError::from("bad path").to_string(), "bad path");

        let err: anyhow::Error = Error::new("boom").into();
        assert_eq!(err.to_string(), "Error: boom");
    }
}
