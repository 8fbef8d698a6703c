use crate::errors::*;

/// The name the wildcard capture is bound under.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub(crate) enum RoutePart {
    PathComponent(String),
    Param(String),
    Wildcard,
}

/// Path is a parsed route pattern, e.g. `/users/:id/files/*`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct Path(Vec<RoutePart>);

impl Path {
    pub(crate) fn new(path: &str) -> Result<Self, ServerError> {
        if !path.starts_with('/') {
            return Err(ServerError(format!("path '{}' must start with '/'", path)));
        }

        if let Some(i) = path.find("//") {
            return Err(ServerError(format!(
                "bad path '{}' contains duplicate // at index:{}",
                path, i
            )));
        }

        let mut parts = Self::default();
        let mut wildcard = false;

        for arg in split(path) {
            if wildcard {
                return Err(ServerError(format!(
                    "path '{}': no segment may follow a wildcard",
                    path
                )));
            }

            if let Some(name) = arg.strip_prefix(':') {
                if name.is_empty() {
                    return Err(ServerError(format!(
                        "path '{}': parameters must be named",
                        path
                    )));
                }

                if parts.params().iter().any(|p| p == name) {
                    return Err(ServerError(format!(
                        "path '{}': parameter '{}' is declared twice",
                        path, name
                    )));
                }

                parts.0.push(RoutePart::Param(name.to_string()));
            } else if arg.starts_with('*') {
                if arg != WILDCARD {
                    return Err(ServerError(format!(
                        "path '{}': wildcards may not be named",
                        path
                    )));
                }

                parts.0.push(RoutePart::Wildcard);
                wildcard = true;
            } else {
                parts.0.push(RoutePart::PathComponent(arg.to_string()));
            }
        }

        Ok(parts)
    }

    pub(crate) fn parts(&self) -> &[RoutePart] {
        &self.0
    }

    /// This method lists all the params available to the path; useful for debugging.
    pub(crate) fn params(&self) -> Vec<String> {
        let mut params = Vec::new();
        for arg in &self.0 {
            if let RoutePart::Param(p) = arg {
                params.push(p.clone());
            }
        }

        params
    }
}

/// Split a path into its non-empty segments; leading, trailing and repeated slashes are ignored.
pub(crate) fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Like [split], but each segment is paired with its byte offset in `path`.
pub(crate) fn segments(path: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = 0;

    for seg in path.split('/') {
        if !seg.is_empty() {
            out.push((start, seg));
        }
        start += seg.len() + 1;
    }

    out
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }

        for part in &self.0 {
            match part {
                RoutePart::Wildcard => write!(f, "/{}", WILDCARD)?,
                RoutePart::PathComponent(pc) => write!(f, "/{}", pc)?,
                RoutePart::Param(param) => write!(f, "/:{}", param)?,
            }
        }

        Ok(())
    }
}
