//! Request routing as a [`Dispatch`] strategy.
//!
//! [`Router`] maps HTTP methods and URL patterns to handlers. Install it with
//! [`ContainerBuilder::dispatcher`](crate::container::ContainerBuilder::dispatcher);
//! requests no route matches fall through to the container's registered
//! handler, so the router only adds behavior on top of it.
//!
//! | Pattern              | Example match              | Captured params                 |
//! |----------------------|----------------------------|---------------------------------|
//! | `/users`             | `/users`                   | *(none)*                        |
//! | `/users/:id`         | `/users/42`                | `id → "42"`                     |
//! | `/files/*`           | `/files/docs/readme.txt`   | `wildcard → "/docs/readme.txt"` |
//!
//! Trailing slashes are normalized on both patterns and incoming paths, so `/users/` and
//! `/users` are treated as equivalent. Routes are matched in registration order; the
//! first route whose method and pattern both match wins.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;

use crate::container::Container;
use crate::handler::{Dispatch, Handler, HandlerError, HandlerFuture};
use crate::http::{Method, PathParams, Request};

// A single path segment, either a literal string or a named capture (`:name`).
#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

// Compiled representation of a route pattern string.
#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Parameterized { segments: Vec<Segment> },
    // Matches the prefix itself and anything below it.
    Wildcard(String),
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

impl Pattern {
    /// Classifies a pattern: `/*` suffix → wildcard, any `:` → parameterized,
    /// otherwise exact.
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Pattern::Wildcard(prefix.to_string());
        }

        if pattern.contains(':') {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s.strip_prefix(':') {
                    Some(name) => Segment::Parameter(name.to_string()),
                    None => Segment::Static(s.to_string()),
                })
                .collect();
            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_string())
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(PathParams::new),
            Pattern::Parameterized { segments } => {
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != path_segments.len() {
                    return None;
                }

                let mut params = PathParams::new();
                for (seg, path_seg) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) if s != path_seg => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => params.insert(name.clone(), path_seg),
                    }
                }
                Some(params)
            }
            Pattern::Wildcard(prefix) => {
                let suffix = path.strip_prefix(prefix.as_str())?;
                if !suffix.is_empty() && !suffix.starts_with('/') {
                    return None;
                }
                let mut params = PathParams::new();
                params.insert("wildcard", suffix);
                Some(params)
            }
        }
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Arc<dyn Handler>,
}

/// Method and path based request dispatch.
///
/// # Examples
///
/// ```rust,no_run
/// use webcontainer::router::Router;
/// use webcontainer::{Container, HandlerError, Request};
///
/// async fn fallback(_req: Request, _c: Container) -> Result<&'static str, HandlerError> {
///     Ok("fallback")
/// }
///
/// async fn user(req: Request, _c: Container) -> Result<String, HandlerError> {
///     Ok(format!("user {}", req.param("id").unwrap_or("?")))
/// }
///
/// let mut router = Router::new();
/// router.get("/users/:id", user);
/// let container = Container::builder(fallback).dispatcher(router).build().unwrap();
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `method` requests matching `pattern`.
    pub fn route<H, F, B>(&mut self, method: Method, pattern: &str, handler: H) -> &mut Self
    where
        H: Fn(Request, Container) -> F + Send + Sync + 'static,
        F: Future<Output = Result<B, HandlerError>> + Send + 'static,
        B: Into<Bytes> + Send,
    {
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(pattern),
            handler: Arc::new(handler),
        });
        self
    }

    pub fn get<H, F, B>(&mut self, pattern: &str, handler: H) -> &mut Self
    where
        H: Fn(Request, Container) -> F + Send + Sync + 'static,
        F: Future<Output = Result<B, HandlerError>> + Send + 'static,
        B: Into<Bytes> + Send,
    {
        self.route(Method::Get, pattern, handler)
    }

    pub fn post<H, F, B>(&mut self, pattern: &str, handler: H) -> &mut Self
    where
        H: Fn(Request, Container) -> F + Send + Sync + 'static,
        F: Future<Output = Result<B, HandlerError>> + Send + 'static,
        B: Into<Bytes> + Send,
    {
        self.route(Method::Post, pattern, handler)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Dispatch for Router {
    fn dispatch(&self, mut request: Request, container: Container) -> HandlerFuture {
        for route in &self.routes {
            if route.method != *request.method() {
                continue;
            }
            if let Some(params) = route.pattern.matches(request.path()) {
                request.set_params(params);
                return route.handler.call(request, container);
            }
        }

        Box::pin(async move { container.call_handler(request).await })
    }
}
