use crate::{app::App, errors::ServerError, handler::Middleware, route::Route};

/// Group is a set of routes sharing a path prefix and middleware.
pub struct Group<'a> {
    app: &'a mut App,
    prefix: String,
    middlewares: Vec<Middleware>,
}

impl<'a> Group<'a> {
    pub(crate) fn new(
        app: &'a mut App,
        parent_prefix: &str,
        prefix: &str,
        middlewares: Vec<Middleware>,
    ) -> Result<Self, ServerError> {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return Err(ServerError::new("the prefix must not be empty"));
        }
        if !prefix.starts_with('/') {
            return Err(ServerError(format!("prefix '{}' must start with '/'", prefix)));
        }

        Ok(Self {
            app,
            prefix: format!("{}{}", parent_prefix, prefix),
            middlewares,
        })
    }

    /// The full prefix, including those of the parent groups.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Add middlewares for the routes and groups created from here on.
    pub fn use_middleware(&mut self, middlewares: &[Middleware]) -> &mut Self {
        self.middlewares.extend_from_slice(middlewares);
        self
    }

    /// A sub-group inheriting this group's middlewares, followed by `middlewares`.
    pub fn group(&mut self, prefix: &str, middlewares: &[Middleware]) -> Result<Group<'_>, ServerError> {
        let mut inherited = self.middlewares.clone();
        inherited.extend_from_slice(middlewares);
        Group::new(self.app, &self.prefix, prefix, inherited)
    }

    /// The same as [Group::group], but the parent's middlewares are not inherited.
    pub fn group_none(&mut self, prefix: &str, middlewares: &[Middleware]) -> Result<Group<'_>, ServerError> {
        Group::new(self.app, &self.prefix, prefix, middlewares.to_vec())
    }

    /// A route below the group's prefix. It must be registered through one of its method calls.
    pub fn route(&mut self, path: &str) -> Result<Route<'_>, ServerError> {
        Route::new(self.app, &self.prefix, path, self.middlewares.clone())
    }
}
