//! A parsed HTTP request and the synchronization point for its body.
//!
//! A [`Request`] is created as soon as its headers are complete, before its
//! body has arrived. The body is delivered later through a single-assignment
//! channel: the connection holds the sending half (`BodyPromise`) and resolves
//! it when the message completes, while handlers await [`Request::body`].
//! If the connection goes away first, the promise is dropped unresolved and
//! every waiter observes [`BodyError::Cancelled`].

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::watch;

use super::{Headers, Method, RequestLine, Version};
use crate::handler::HandlerError;

/// Errors observed while waiting for a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BodyError {
    #[error("connection closed before the request body was complete")]
    Cancelled,
}

/// Sending half of a request body. Resolved at most once.
#[derive(Debug)]
pub(crate) struct BodyPromise {
    tx: watch::Sender<Option<Bytes>>,
}

impl BodyPromise {
    /// Creates a promise and the receiving half that goes into the [`Request`].
    pub(crate) fn new() -> (Self, watch::Receiver<Option<Bytes>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }

    /// Resolves the body. Consumes the promise, so a body can only be set once.
    pub(crate) fn resolve(self, body: Bytes) {
        self.tx.send_replace(Some(body));
    }
}

/// Path parameters captured by the router.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// One HTTP request received by the container.
///
/// The headers are a snapshot taken when header parsing completed. The body
/// may still be in flight; await [`body`](Self::body) to get it.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    version: Version,
    headers: Headers,
    params: PathParams,
    body: watch::Receiver<Option<Bytes>>,
}

impl Request {
    pub(crate) fn new(
        line: RequestLine,
        headers: Headers,
        body: watch::Receiver<Option<Bytes>>,
    ) -> Self {
        let RequestLine {
            method,
            target,
            version,
        } = line;
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (target, None),
        };

        Self {
            method,
            path,
            query,
            version,
            headers,
            params: PathParams::new(),
            body,
        }
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get_str("content-length")?.trim().parse().ok()
    }

    /// Whether the connection stays open after this request is answered.
    ///
    /// HTTP/1.0 connections always close. HTTP/1.1 connections close only on
    /// `Connection: close`.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::Http10 => false,
            Version::Http11 => !self
                .headers
                .get_str("connection")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("close")),
        }
    }

    /// Returns a path parameter captured by the router.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Returns all path parameters captured by the router.
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub(crate) fn set_params(&mut self, params: PathParams) {
        self.params = params;
    }

    /// Waits until the complete body has arrived and returns it.
    ///
    /// May be called any number of times; every call yields the same bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BodyError::Cancelled`] if the connection closed before the
    /// body was complete. A truncated body is never returned.
    pub async fn body(&self) -> Result<Bytes, BodyError> {
        let mut rx = self.body.clone();
        let body = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| BodyError::Cancelled)?
            .clone();
        Ok(body.unwrap_or_default())
    }

    /// Waits for the body and deserializes it as JSON.
    ///
    /// # Errors
    ///
    /// Fails with a [`HandlerError`] of kind
    /// [`BodyCancelled`](crate::handler::ErrorKind::BodyCancelled) or
    /// [`InvalidBody`](crate::handler::ErrorKind::InvalidBody).
    pub async fn json<T>(&self) -> Result<T, HandlerError>
    where
        T: serde::de::DeserializeOwned,
    {
        let body = self.body().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ErrorKind;

    fn line(target: &str) -> RequestLine {
        RequestLine {
            method: Method::Post,
            target: target.to_owned(),
            version: Version::Http11,
        }
    }

    #[test]
    fn target_split_into_path_and_query() {
        let (_promise, rx) = BodyPromise::new();
        let req = Request::new(line("/search?q=rust"), Headers::new(), rx);
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust"));
        assert_eq!(req.version().as_str(), "1.1");
    }

    #[test]
    fn content_length_from_headers() {
        let mut headers = Headers::new();
        headers.insert("Content-Length", "3");
        let (_promise, rx) = BodyPromise::new();
        let req = Request::new(line("/"), headers, rx);
        assert_eq!(req.content_length(), Some(3));
        assert_eq!(req.headers().get_str("content-length"), Some("3"));
    }

    #[test]
    fn keep_alive_depends_on_version_and_connection_header() {
        let (_promise, rx) = BodyPromise::new();
        let req = Request::new(line("/"), Headers::new(), rx.clone());
        assert!(req.keep_alive());

        let mut headers = Headers::new();
        headers.insert("Connection", "Close");
        let req = Request::new(line("/"), headers, rx.clone());
        assert!(!req.keep_alive());

        let mut headers = Headers::new();
        headers.insert("Connection", "keep-alive");
        let old = RequestLine {
            version: Version::Http10,
            ..line("/")
        };
        let req = Request::new(old, headers, rx);
        assert_eq!(req.version().as_str(), "1.0");
        assert!(!req.keep_alive());
    }

    #[tokio::test]
    async fn body_waits_for_resolution() {
        let (promise, rx) = BodyPromise::new();
        let req = Request::new(line("/"), Headers::new(), rx);

        let waiter = {
            let req = req.clone();
            tokio::spawn(async move { req.body().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        promise.resolve(Bytes::from_static(b"XYZ"));
        assert_eq!(waiter.await.unwrap().unwrap(), Bytes::from_static(b"XYZ"));
        // Still readable after the promise is gone.
        assert_eq!(req.body().await.unwrap(), Bytes::from_static(b"XYZ"));
    }

    #[tokio::test]
    async fn dropped_promise_cancels_waiters() {
        let (promise, rx) = BodyPromise::new();
        let req = Request::new(line("/"), Headers::new(), rx);
        drop(promise);
        assert_eq!(req.body().await, Err(BodyError::Cancelled));
    }

    #[tokio::test]
    async fn json_body() {
        #[derive(serde::Deserialize)]
        struct Greeting {
            name: String,
        }

        let (promise, rx) = BodyPromise::new();
        let req = Request::new(line("/"), Headers::new(), rx);
        promise.resolve(Bytes::from_static(br#"{"name":"ferris"}"#));
        let greeting: Greeting = req.json().await.unwrap();
        assert_eq!(greeting.name, "ferris");
    }

    #[tokio::test]
    async fn json_body_invalid() {
        let (promise, rx) = BodyPromise::new();
        let req = Request::new(line("/"), Headers::new(), rx);
        promise.resolve(Bytes::from_static(b"not json"));
        let err = req.json::<serde_json::Value>().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidBody);
    }
}
