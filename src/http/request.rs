//! HTTP requests as the harness sends them
//!
//! Requests are written to the socket by hand instead of through an HTTP
//! library: tests routinely send malformed or unusual requests on purpose,
//! and header order, case and duplicates must reach the WAF untouched.

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;

use super::Destination;

/// Ordered, case-preserving header list that allows duplicate names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any existing one with the same name
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Replace every header named `name` (case-insensitive) with a single one
    ///
    /// The replacement takes the position of the first match, or is
    /// appended if there was none.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter().position(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(first) => {
                self.0[first].1 = value;
                let mut index = 0;
                self.0.retain(|(n, _)| {
                    let keep = index <= first || !n.eq_ignore_ascii_case(name);
                    index += 1;
                    keep
                });
            }
            None => self.add(name, value),
        }
    }

    /// First value for `name`, compared case-insensitively
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Every header of `other` replaces same-named headers here
    pub fn merge(&mut self, other: &Headers) {
        for (name, value) in other.iter() {
            self.set(name, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Headers(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Test files write headers either as a mapping or, when a name repeats,
/// as a list of `{name, value}` entries.
impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Entry {
            name: String,
            value: String,
        }

        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = Headers;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a header mapping or a list of {name, value} entries")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Headers, E> {
                Ok(Headers::new())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Headers, A::Error> {
                let mut headers = Headers::new();
                while let Some((name, value)) = map.next_entry::<String, String>()? {
                    headers.add(name, value);
                }
                Ok(headers)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Headers, A::Error> {
                let mut headers = Headers::new();
                while let Some(entry) = seq.next_element::<Entry>()? {
                    headers.add(entry.name, entry.value);
                }
                Ok(headers)
            }
        }

        deserializer.deserialize_any(HeadersVisitor)
    }
}

/// `METHOD URI VERSION`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub uri: String,
    pub version: String,
}

impl RequestLine {
    pub fn new(
        method: impl Into<String>,
        uri: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.method, self.uri, self.version)
    }
}

/// A request, either pre-encoded or built from its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Sent byte-for-byte
    Raw(Vec<u8>),
    Structured {
        line: RequestLine,
        headers: Headers,
        body: Vec<u8>,
        /// Add `Host` and `Content-Length` when the test left them out
        autocomplete_headers: bool,
    },
}

impl Request {
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Request::Raw(bytes.into())
    }

    pub fn structured(
        line: RequestLine,
        headers: Headers,
        body: impl Into<Vec<u8>>,
        autocomplete_headers: bool,
    ) -> Self {
        Request::Structured {
            line,
            headers,
            body: body.into(),
            autocomplete_headers,
        }
    }

    /// Whether the response to this request carries no body
    pub fn is_head(&self) -> bool {
        match self {
            Request::Structured { line, .. } => line.method.eq_ignore_ascii_case("HEAD"),
            Request::Raw(bytes) => bytes
                .split(|b| *b == b' ')
                .next()
                .is_some_and(|method| method.eq_ignore_ascii_case(b"HEAD")),
        }
    }

    /// Wire encoding of the request for `destination`
    pub fn to_bytes(&self, destination: &Destination) -> Vec<u8> {
        let (line, headers, body, autocomplete) = match self {
            Request::Raw(bytes) => return bytes.clone(),
            Request::Structured {
                line,
                headers,
                body,
                autocomplete_headers,
            } => (line, headers, body, *autocomplete_headers),
        };

        let mut headers = headers.clone();
        if autocomplete {
            if !headers.contains("Host") {
                headers.add("Host", destination.host_header());
            }
            if !body.is_empty()
                && !headers.contains("Content-Length")
                && !headers.contains("Transfer-Encoding")
            {
                headers.add("Content-Length", body.len().to_string());
            }
        }

        let mut out = Vec::with_capacity(128 + body.len());
        out.extend_from_slice(line.to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(body);
        out
    }
}
