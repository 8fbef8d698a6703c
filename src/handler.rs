use crate::{context::Context, HTTPResult, PinBox};
use std::{future::Future, sync::Arc};

/// The boxed future every [Handler] resolves through.
pub type HandlerFuture = PinBox<dyn Future<Output = HTTPResult> + Send>;

type HandlerFn = dyn Fn(Context) -> HandlerFuture + Send + Sync;
type MiddlewareFn = dyn Fn(Handler) -> Handler + Send + Sync;

/// Handler is the unit of request processing: it takes ownership of a [Context] and produces
/// either a response or a classified [crate::errors::Error].
///
/// Handlers are reference counted; cloning one is cheap and the clone calls the same function.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    /// Construct a handler from any async function or closure taking a [Context].
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HTTPResult> + Send + 'static,
    {
        Self(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    /// Run the handler against the context.
    pub fn call(&self, ctx: Context) -> HandlerFuture {
        (self.0)(ctx)
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Handler")
    }
}

/// Middleware transforms one [Handler] into another, usually by running code before and after
/// the inner handler.
///
/// ```
/// use keel::prelude::*;
///
/// let log = Middleware::new(|next: Handler| {
///     Handler::new(move |ctx: Context| {
///         let next = next.clone();
///         async move {
///             let path = ctx.path().to_string();
///             let res = next.call(ctx).await;
///             println!("{} -> {:?}", path, res.as_ref().map(|r| r.status()));
///             res
///         }
///     })
/// });
/// # drop(log);
/// ```
#[derive(Clone)]
pub struct Middleware(Arc<MiddlewareFn>);

impl Middleware {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Handler) -> Handler + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Wrap a single handler.
    pub fn wrap(&self, handler: Handler) -> Handler {
        (self.0)(handler)
    }
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Middleware")
    }
}

/// Wrap `handler` in `middlewares`. The first middleware is the outermost one: for `[a, b]` the
/// request passes through `a`, then `b`, then the handler, and unwinds in reverse.
pub fn compose(handler: Handler, middlewares: &[Middleware]) -> Handler {
    middlewares
        .iter()
        .rev()
        .fold(handler, |handler, middleware| middleware.wrap(handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use http::{Request, Response, StatusCode};
    use hyper::Body;
    use std::sync::Mutex;

    fn recorder(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Middleware {
        Middleware::new(move |next: Handler| {
            let log = log.clone();
            Handler::new(move |ctx: Context| {
                let next = next.clone();
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(format!("{}-enter", name));
                    let res = next.call(ctx).await;
                    log.lock().unwrap().push(format!("{}-exit", name));
                    res
                }
            })
        })
    }

    fn terminal(log: Arc<Mutex<Vec<String>>>) -> Handler {
        Handler::new(move |_ctx: Context| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push("H".to_string());
                Ok(Response::new(Body::empty()))
            }
        })
    }

    fn ctx() -> Context {
        Context::new(Request::builder().uri("/").body(Body::empty()).unwrap())
    }

    #[tokio::test]
    async fn test_compose_ordering() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = compose(
            terminal(log.clone()),
            &[recorder("A", log.clone()), recorder("B", log.clone())],
        );

        handler.call(ctx()).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["A-enter", "B-enter", "H", "B-exit", "A-exit"]
        );
    }

    #[tokio::test]
    async fn test_compose_empty_is_identity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = compose(terminal(log.clone()), &[]);
        handler.call(ctx()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["H"]);
    }

    #[tokio::test]
    async fn test_compose_independent_chains() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = [recorder("A", log.clone())];

        let ok = compose(terminal(log.clone()), &chain);
        let failing = compose(
            Handler::new(|_ctx: Context| async {
                Err(Error::new_status(StatusCode::CONFLICT, "taken"))
            }),
            &chain,
        );

        assert!(ok.call(ctx()).await.is_ok());
        assert_eq!(
            failing.call(ctx()).await.unwrap_err().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            *log.lock().unwrap(),
            vec!["A-enter", "H", "A-exit", "A-enter", "A-exit"]
        );
    }
}
