//! HTTP header map with case-insensitive name lookup.
//!
//! Header names are ASCII text; values are kept as raw bytes because HTTP/1.x
//! does not guarantee they are valid UTF-8.

use bytes::Bytes;

/// A case-insensitive, multi-value HTTP header map.
///
/// Preserves insertion order and allows multiple values per header name.
/// Used both for the headers accumulated while a request is parsed and for
/// the headers written in front of a response.
///
/// # Examples
///
/// ```
/// use webcontainer::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Host", "example.com");
/// headers.insert("X-Custom", "first");
/// headers.insert("X-Custom", "second");
///
/// assert_eq!(headers.get("host"), Some(&b"example.com"[..]));
/// assert_eq!(headers.get_str("HOST"), Some("example.com"));
/// assert_eq!(headers.get_all("x-custom").count(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, Bytes)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header entry. Multiple values for the same name are preserved.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Bytes>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Returns the first value for the given header name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_ref())
    }

    /// Returns the first value for `name` if it is valid UTF-8.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Returns an iterator over all values for the given header name (case-insensitive).
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.inner
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_ref())
    }

    /// Removes all entries with the given header name (case-insensitive).
    ///
    /// Returns `true` if any entries were removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() < before
    }

    /// Returns `true` if the map contains at least one entry with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Removes every entry, keeping the allocation.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Returns the total number of header entries (not unique names).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_get() {
        let mut h = Headers::new();
        h.insert("Content-Type", "text/plain");
        assert_eq!(h.get_str("content-type"), Some("text/plain"));
        assert_eq!(h.get_str("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(h.get("Content-Type"), Some(&b"text/plain"[..]));
    }

    #[test]
    fn non_utf8_value_is_kept_as_bytes() {
        let mut h = Headers::new();
        h.insert("X-Raw", Bytes::from_static(b"\xff\xfe"));
        assert_eq!(h.get("x-raw"), Some(&b"\xff\xfe"[..]));
        assert_eq!(h.get_str("x-raw"), None);
    }

    #[test]
    fn multi_value() {
        let mut h = Headers::new();
        h.insert("Set-Cookie", "a=1");
        h.insert("Set-Cookie", "b=2");
        let vals: Vec<_> = h.get_all("set-cookie").collect();
        assert_eq!(vals, vec![&b"a=1"[..], &b"b=2"[..]]);
    }

    #[test]
    fn remove_and_clear() {
        let mut h = Headers::new();
        h.insert("X-Foo", "bar");
        h.insert("X-Foo", "baz");
        h.insert("Host", "example.com");
        assert!(h.remove("x-foo"));
        assert!(!h.remove("x-foo"));
        assert_eq!(h.len(), 1);
        h.clear();
        assert!(h.is_empty());
    }
}
