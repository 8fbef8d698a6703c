//! The per-host matching engine.
//!
//! Every method gets its own segment tree. At each level a static segment is tried first, then
//! the named parameter, then the wildcard; a failed branch backtracks to the next candidate, so
//! the outcome never depends on registration order. Anything that would make two patterns
//! indistinguishable is refused when it is added.
use crate::{
    errors::ServerError,
    handler::Handler,
    path::{segments, Path, RoutePart, WILDCARD},
    Params,
};
use http::Method;
use percent_encoding::percent_decode_str;
use std::collections::{BTreeMap, HashMap};

#[derive(Default, Clone)]
struct Node {
    statics: BTreeMap<String, Node>,
    param: Option<(String, Box<Node>)>,
    wildcard: Option<Handler>,
    handler: Option<Handler>,
}

/// The result of [Router::find].
#[derive(Debug)]
pub enum Match {
    /// The handler registered for the method and path, with the parameters it bound.
    Found(Handler, Params),
    /// The path is registered, but not for the requested method. Carries the methods that are,
    /// sorted by name, for use in an `Allow` header.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

/// Router resolves (method, path) pairs to handlers for a single host. It is built during
/// registration and only read afterwards, so a shared reference may be used from any number of
/// tasks at once.
#[derive(Default, Clone)]
pub struct Router {
    trees: HashMap<Method, Node>,
    len: usize,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of (method, pattern) pairs registered.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Register `handler` for `method` on `pattern`. Fails for malformed patterns, duplicates,
    /// and patterns that clash with an existing one on the same method.
    pub fn add(&mut self, method: Method, pattern: &str, handler: Handler) -> Result<(), ServerError> {
        let path = Path::new(pattern)?;
        let conflict = |reason: String| {
            ServerError(format!("route {} {} conflicts: {}", method, path, reason))
        };

        let mut node = self.trees.entry(method.clone()).or_default();

        for part in path.parts() {
            match part {
                RoutePart::PathComponent(s) => {
                    node = node.statics.entry(s.clone()).or_default();
                }
                RoutePart::Param(name) => {
                    if let Some((existing, _)) = &node.param {
                        if existing != name {
                            return Err(conflict(format!(
                                "parameter ':{}' is already registered as ':{}' at this position",
                                name, existing
                            )));
                        }
                    }

                    node = node
                        .param
                        .get_or_insert_with(|| (name.clone(), Box::default()))
                        .1
                        .as_mut();
                }
                RoutePart::Wildcard => {
                    if node.wildcard.is_some() {
                        return Err(conflict("a wildcard is already registered here".to_string()));
                    }

                    node.wildcard = Some(handler);
                    self.len += 1;
                    return Ok(());
                }
            }
        }

        if node.handler.is_some() {
            return Err(conflict("the route is already registered".to_string()));
        }

        node.handler = Some(handler);
        self.len += 1;
        Ok(())
    }

    /// Resolve a request path for a method.
    pub fn find(&self, method: &Method, path: &str) -> Match {
        let segs = segments(path);

        if let Some(tree) = self.trees.get(method) {
            let mut params = Vec::new();
            if let Some(handler) = lookup(tree, path, &segs, &mut params) {
                return Match::Found(handler.clone(), params.into_iter().collect());
            }
        }

        let mut allowed: Vec<Method> = self
            .trees
            .iter()
            .filter(|(m, _)| *m != method)
            .filter(|(_, tree)| lookup(tree, path, &segs, &mut Vec::new()).is_some())
            .map(|(m, _)| m.clone())
            .collect();

        if allowed.is_empty() {
            return Match::NotFound;
        }

        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Match::MethodNotAllowed(allowed)
    }
}

/// Captured values are bound percent-decoded; invalid UTF-8 is replaced.
fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

fn lookup<'a>(
    node: &'a Node,
    path: &str,
    segs: &[(usize, &str)],
    params: &mut Vec<(String, String)>,
) -> Option<&'a Handler> {
    let Some(&(offset, seg)) = segs.first() else {
        if let Some(handler) = &node.handler {
            return Some(handler);
        }

        return node.wildcard.as_ref().map(|handler| {
            params.push((WILDCARD.to_string(), String::new()));
            handler
        });
    };

    let rest = &segs[1..];

    if let Some(child) = node.statics.get(seg) {
        if let Some(handler) = lookup(child, path, rest, params) {
            return Some(handler);
        }
    }

    if let Some((name, child)) = &node.param {
        let mark = params.len();
        params.push((name.clone(), decode(seg)));
        if let Some(handler) = lookup(child, path, rest, params) {
            return Some(handler);
        }
        params.truncate(mark);
    }

    node.wildcard.as_ref().map(|handler| {
        params.push((
            WILDCARD.to_string(),
            decode(path[offset..].trim_end_matches('/')),
        ));
        handler
    })
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("routes", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use http::{Request, Response, StatusCode};
    use hyper::Body;
    use std::sync::Arc;

    fn named(name: &'static str) -> Handler {
        Handler::new(move |ctx: Context| async move { ctx.text(StatusCode::OK, name) })
    }

    async fn found(router: &Router, method: Method, path: &str) -> (String, Params) {
        match router.find(&method, path) {
            Match::Found(handler, params) => {
                let ctx = Context::new(Request::builder().uri(path).body(Body::empty()).unwrap());
                let res: Response<Body> = handler.call(ctx).await.unwrap();
                let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
                (String::from_utf8(body.to_vec()).unwrap(), params)
            }
            other => panic!("{} {} did not match: {:?}", method, path, other),
        }
    }

    #[tokio::test]
    async fn test_router_params() {
        let mut router = Router::new();
        router.add(Method::GET, "/users/:id", named("user")).unwrap();
        router
            .add(Method::GET, "/abc/:def/:ghi/jkl", named("abc"))
            .unwrap();
        router.add(Method::GET, "/", named("root")).unwrap();

        let (name, params) = found(&router, Method::GET, "/users/42").await;
        assert_eq!(name, "user");
        assert_eq!(params.get("id").map(String::as_str), Some("42"));

        let (name, params) = found(&router, Method::GET, "/abc/wooble/wakka/jkl").await;
        assert_eq!(name, "abc");
        assert_eq!(params.get("def").map(String::as_str), Some("wooble"));
        assert_eq!(params.get("ghi").map(String::as_str), Some("wakka"));

        let (name, params) = found(&router, Method::GET, "/").await;
        assert_eq!(name, "root");
        assert!(params.is_empty());

        assert!(matches!(router.find(&Method::GET, "/users"), Match::NotFound));
        assert!(matches!(
            router.find(&Method::GET, "/users/42/extra"),
            Match::NotFound
        ));
        assert!(matches!(
            router.find(&Method::GET, "/abc/ghi/def/nope"),
            Match::NotFound
        ));
    }

    #[tokio::test]
    async fn test_router_decodes_captures() {
        let mut router = Router::new();
        router.add(Method::GET, "/users/:name", named("user")).unwrap();
        router.add(Method::GET, "/files/*", named("files")).unwrap();

        let (_, params) = found(&router, Method::GET, "/users/john%20doe").await;
        assert_eq!(params.get("name").map(String::as_str), Some("john doe"));

        let (_, params) = found(&router, Method::GET, "/files/a%2Fb/c%C3%A9").await;
        assert_eq!(params.get(WILDCARD).map(String::as_str), Some("a/b/cé"));
    }

    #[tokio::test]
    async fn test_router_static_precedence() {
        let mut router = Router::new();
        router.add(Method::GET, "/users/:id", named("param")).unwrap();
        router.add(Method::GET, "/users/list", named("static")).unwrap();

        assert_eq!(found(&router, Method::GET, "/users/list").await.0, "static");
        assert_eq!(found(&router, Method::GET, "/users/7").await.0, "param");
    }

    #[tokio::test]
    async fn test_router_backtracking() {
        let mut router = Router::new();
        router.add(Method::GET, "/a/b/c", named("static")).unwrap();
        router.add(Method::GET, "/a/:x/d", named("param")).unwrap();
        router.add(Method::GET, "/a/*", named("wildcard")).unwrap();

        assert_eq!(found(&router, Method::GET, "/a/b/c").await.0, "static");

        let (name, params) = found(&router, Method::GET, "/a/b/d").await;
        assert_eq!(name, "param");
        assert_eq!(params.get("x").map(String::as_str), Some("b"));
        assert_eq!(params.len(), 1);

        let (name, params) = found(&router, Method::GET, "/a/b/e").await;
        assert_eq!(name, "wildcard");
        assert_eq!(params.get(WILDCARD).map(String::as_str), Some("b/e"));
        assert_eq!(params.len(), 1);
    }

    #[tokio::test]
    async fn test_router_wildcard() {
        let mut router = Router::new();
        router.add(Method::GET, "/files/*", named("files")).unwrap();

        let (_, params) = found(&router, Method::GET, "/files/a/b/c").await;
        assert_eq!(params.get(WILDCARD).map(String::as_str), Some("a/b/c"));

        let (_, params) = found(&router, Method::GET, "/files/a//b/").await;
        assert_eq!(params.get(WILDCARD).map(String::as_str), Some("a//b"));

        let (_, params) = found(&router, Method::GET, "/files").await;
        assert_eq!(params.get(WILDCARD).map(String::as_str), Some(""));

        assert!(router.add(Method::GET, "/files/*/more", named("x")).is_err());
        assert!(router.add(Method::GET, "/files/*", named("x")).is_err());
    }

    #[test]
    fn test_router_conflicts() {
        let mut router = Router::new();
        router.add(Method::GET, "/users/:id", named("a")).unwrap();

        assert!(router.add(Method::GET, "/users/:id", named("b")).is_err());
        assert!(router.add(Method::GET, "/users//:id", named("b")).is_err());
        assert!(router.add(Method::GET, "/users/:id/", named("b")).is_err());
        assert!(router.add(Method::GET, "/users/:name", named("b")).is_err());
        assert!(router
            .add(Method::GET, "/users/:name/posts", named("b"))
            .is_err());

        // same parameter name extends the existing slot
        router.add(Method::GET, "/users/:id/posts", named("c")).unwrap();
        // other methods have their own trees
        router.add(Method::POST, "/users/:name", named("d")).unwrap();

        assert_eq!(router.len(), 3);
    }

    #[test]
    fn test_router_method_not_allowed() {
        let mut router = Router::new();
        router.add(Method::GET, "/things/:id", named("get")).unwrap();
        router.add(Method::PUT, "/things/:id", named("put")).unwrap();
        router.add(Method::DELETE, "/things/:id", named("delete")).unwrap();
        router.add(Method::POST, "/things", named("post")).unwrap();

        match router.find(&Method::PATCH, "/things/1") {
            Match::MethodNotAllowed(methods) => {
                assert_eq!(methods, vec![Method::DELETE, Method::GET, Method::PUT])
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            router.find(&Method::PATCH, "/nothing"),
            Match::NotFound
        ));
    }

    #[test]
    fn test_router_concurrent_reads() {
        let mut router = Router::new();
        router.add(Method::GET, "/users/:id", named("user")).unwrap();
        let router = Arc::new(router);

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let router = router.clone();
                std::thread::spawn(move || match router.find(&Method::GET, &format!("/users/{}", i)) {
                    Match::Found(_, params) => params.get("id").cloned(),
                    _ => None,
                })
            })
            .collect();

        for (i, t) in threads.into_iter().enumerate() {
            assert_eq!(t.join().unwrap(), Some(i.to_string()));
        }
    }
}
