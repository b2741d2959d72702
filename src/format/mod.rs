//! Canonical textual renderings of requests and responses for the status
//! history: raw HTTP messages and copy-pasteable curl commands.

pub mod curl;
pub mod http;
pub mod response;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::sanitize::Sanitizer;

pub use curl::build_curl;
pub use http::{build_request, build_response, reason_phrase};
pub use response::{mask_headers, render_response};

const TRUNCATION_MARKER: &str = "\n…[truncated]";

/// Header names with one or more values each, in insertion order.
/// Names are stored as given; lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: IndexMap<String, Vec<String>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `Name: value` lines. Lines without a colon are ignored.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut headers = Self::new();
        for line in lines {
            if let Some((name, value)) = line.as_ref().split_once(':') {
                headers.append(name, value.trim_start());
            }
        }
        headers
    }

    /// Sets `name` to a single value, replacing any existing values.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.remove(name);
        self.entries.insert(name.trim().to_string(), vec![value.into()]);
    }

    /// Adds a value, keeping the existing ones under the first spelling of `name`.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let name = name.trim();
        let key = self
            .key_of(name)
            .map(str::to_string)
            .unwrap_or_else(|| name.to_string());
        self.entries.entry(key).or_default().push(value.into());
    }

    /// Chained [`Headers::append`].
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.append(name, value);
        self
    }

    /// Removes every value of `name`, ignoring case.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        let key = self.key_of(name)?.to_string();
        self.entries.shift_remove(&key)
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        let key = self.key_of(name)?;
        self.entries.get(key)?.first().map(String::as_str)
    }

    /// Names with their values, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lower-cased, trimmed `Content-Type`.
    pub fn content_type(&self) -> Option<String> {
        self.get("content-type").map(|v| v.trim().to_lowercase())
    }

    /// Same headers with title-cased names, merging names that differ only in case.
    pub fn canonical(&self) -> Headers {
        let mut out = Headers::new();
        for (name, values) in self.iter() {
            let name = canonical_name(name);
            let slot = out.entries.entry(name).or_default();
            slot.extend(values.iter().cloned());
        }
        out
    }

    /// One string per header, multiple values joined with `, `.
    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .iter()
            .map(|(name, values)| (name.to_string(), Value::String(values.join(", "))))
            .collect();
        Value::Object(map)
    }

    /// Accepts an object of strings or arrays of strings.
    pub fn from_value(value: &Value) -> Headers {
        let mut headers = Headers::new();
        if let Value::Object(map) = value {
            for (name, value) in map {
                match value {
                    Value::Array(values) => {
                        for v in values {
                            headers.append(name, scalar_to_string(v));
                        }
                    }
                    other => headers.append(name, scalar_to_string(other)),
                }
            }
        }
        headers
    }

    fn key_of(&self, name: &str) -> Option<&str> {
        let name = name.trim();
        self.entries
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name.as_ref(), value);
        }
        headers
    }
}

/// `content-TYPE` becomes `Content-Type`.
pub fn canonical_name(name: &str) -> String {
    name.trim()
        .split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join("-")
}

/// Message body: absent, raw text, or a structure rendered per content type.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    /// Sent or received as is.
    Text(String),
    /// Rendered as JSON or form data after the `Content-Type`.
    Structured(Value),
}

impl Body {
    /// Null and empty strings are [`Body::Empty`]; scalars become text.
    pub fn from_value(value: Value) -> Body {
        match value {
            Value::Null => Body::Empty,
            Value::String(s) if s.is_empty() => Body::Empty,
            Value::String(s) => Body::Text(s),
            Value::Bool(_) | Value::Number(_) => Body::Text(value.to_string()),
            structured => Body::Structured(structured),
        }
    }

    /// Inverse of [`Body::from_value`].
    pub fn to_value(&self) -> Value {
        match self {
            Body::Empty => Value::Null,
            Body::Text(s) => Value::String(s.clone()),
            Body::Structured(v) => v.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// A logical request: what was sent or received, before rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescription {
    /// Upper-cased.
    pub method: String,
    /// Absolute or path-only.
    pub url: String,
    pub headers: Headers,
    pub body: Body,
    /// Defaults to `1.1`.
    pub http_version: String,
}

impl RequestDescription {
    /// Empty headers and body over HTTP/1.1.
    pub fn new(method: impl AsRef<str>, url: impl Into<String>) -> Self {
        Self {
            method: method.as_ref().to_uppercase(),
            url: url.into(),
            headers: Headers::new(),
            body: Body::Empty,
            http_version: "1.1".to_string(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn http_version(mut self, version: impl Into<String>) -> Self {
        self.http_version = version.into();
        self
    }

    /// The shape a [`Sanitizer`] walks: `method`, `url`, `headers`, `payload`.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("method".into(), Value::String(self.method.clone()));
        map.insert("url".into(), Value::String(self.url.clone()));
        map.insert("headers".into(), self.headers.to_value());
        map.insert("payload".into(), self.body.to_value());
        map.insert("http_version".into(), Value::String(self.http_version.clone()));
        Value::Object(map)
    }

    /// Reads the [`RequestDescription::to_value`] shape back. Missing keys fall back
    /// to `GET /` over HTTP/1.1.
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str, default: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        Self {
            method: text("method", "GET").to_uppercase(),
            url: text("url", "/"),
            headers: value.get("headers").map(Headers::from_value).unwrap_or_default(),
            body: Body::from_value(value.get("payload").cloned().unwrap_or(Value::Null)),
            http_version: text("http_version", "1.1"),
        }
    }

    /// Masked copy of this description.
    pub fn sanitized(&self, sanitizer: &Sanitizer) -> Self {
        Self::from_value(&sanitizer.apply(&self.to_value()))
    }
}

/// A logical response. Without a reason the standard phrase is used.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseDescription {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: Headers,
    pub body: Body,
    pub http_version: String,
}

impl ResponseDescription {
    /// Empty response with the standard reason phrase.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: None,
            headers: Headers::new(),
            body: Body::Empty,
            http_version: "1.1".to_string(),
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Explicit reason, or the standard phrase for the status code.
    pub fn reason_or_default(&self) -> &str {
        match self.reason.as_deref() {
            Some(reason) if !reason.is_empty() => reason,
            _ => reason_phrase(self.status),
        }
    }
}

/// Rendering switches for [`build_request`] and [`render_response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub pretty_json: bool,
    /// Body byte limit; 0 disables truncation.
    pub truncate_body_to: usize,
    pub recompute_content_length: bool,
}

impl FormatOptions {
    /// Defaults for requests: `Content-Length` left as given.
    pub fn request() -> Self {
        Self {
            pretty_json: true,
            truncate_body_to: 0,
            recompute_content_length: false,
        }
    }

    /// Defaults for responses: `Content-Length` matches the rendered body.
    pub fn response() -> Self {
        Self {
            recompute_content_length: true,
            ..Self::request()
        }
    }

    pub fn truncate_to(mut self, limit: usize) -> Self {
        self.truncate_body_to = limit;
        self
    }

    /// Single-line JSON bodies.
    pub fn compact(mut self) -> Self {
        self.pretty_json = false;
        self
    }
}

/// How a dispatched request is written to the history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestFormat {
    #[default]
    Curl,
    Http,
}

pub(crate) fn json_text(value: &Value, pretty: bool) -> String {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    rendered.unwrap_or_default()
}

/// Cuts `body` at a char boundary within `limit` bytes and appends the marker.
pub(crate) fn truncate(mut body: String, limit: usize) -> String {
    if limit == 0 || body.len() <= limit {
        return body;
    }
    let mut cut = limit;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    body.truncate(cut);
    body.push_str(TRUNCATION_MARKER);
    body
}

/// String form of a scalar the way form encoders write it: `true` as `1`,
/// `false` and `null` as empty.
pub(crate) fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) | Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        nested => nested.to_string(),
    }
}

/// Flattens a structure into form pairs, nesting as `a[b][0]=v`. Null
/// leaves are dropped.
pub fn query_pairs(value: &Value) -> Vec<(String, String)> {
    fn walk(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    walk(&format!("{prefix}[{k}]"), v, out);
                }
            }
            Value::Array(items) => {
                for (i, v) in items.iter().enumerate() {
                    walk(&format!("{prefix}[{i}]"), v, out);
                }
            }
            Value::Null => {}
            scalar => out.push((prefix.to_string(), scalar_to_string(scalar))),
        }
    }

    let mut out = Vec::new();
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                walk(k, v, &mut out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                walk(&i.to_string(), v, &mut out);
            }
        }
        _ => {}
    }
    out
}

/// `application/x-www-form-urlencoded` rendering of a structure.
pub fn form_encode(value: &Value) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query_pairs(value))
        .finish()
}

/// Percent-encodes everything except RFC 3986 unreserved characters.
pub fn raw_url_encode(input: &str) -> String {
    url::form_urlencoded::byte_serialize(input.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
        .replace('*', "%2A")
        .replace("%7E", "~")
}
