//! Response rendering for the history, with sensitive headers masked.

use regex::Regex;
use serde_json::{Value, json};

use super::http::{assemble, serialize_body};
use super::{Body, FormatOptions, Headers, ResponseDescription, truncate};
use crate::sanitize::{AUTH_SCHEME_PREFIX, Sanitizer};

const FIXED_MASK_LEN: usize = 8;
const LONG_TOKEN_LEN: usize = 64;

const AUTH_HEADERS: &[&str] = &["authorization", "proxy-authorization"];
const KEY_HEADERS: &[&str] = &["x-api-key", "x-api-token", "api-key", "x-auth-token"];
const COOKIE_HEADERS: &[&str] = &["cookie", "set-cookie"];
const COOKIE_ATTRIBUTES: &[&str] = &[
    "path", "httponly", "secure", "samesite", "domain", "expires", "max-age",
];

/// Masks header values with a fixed policy:
///
/// - `Authorization` style headers keep their scheme (`Bearer ********`),
/// - api-key style headers are fully masked,
/// - cookies keep their attributes but lose their values,
/// - anything else goes through `sanitizer`, or, without one, long
///   token-looking values keep only their first six characters.
pub fn mask_headers(headers: &Headers, sanitizer: Option<&Sanitizer>, mask_char: char) -> Headers {
    let mask = mask_char.to_string().repeat(FIXED_MASK_LEN);
    let scheme = Regex::new(AUTH_SCHEME_PREFIX).ok();
    let token = Regex::new(r"^[A-Za-z0-9\-._~+/]+=*$").ok();

    let mut out = Headers::new();
    for (name, values) in headers.iter() {
        let lower = name.to_lowercase();
        for value in values {
            let masked = if AUTH_HEADERS.contains(&lower.as_str()) {
                match scheme.as_ref().and_then(|re| re.find(value)) {
                    Some(prefix) => format!("{}{mask}", prefix.as_str()),
                    None => mask.clone(),
                }
            } else if KEY_HEADERS.contains(&lower.as_str()) {
                mask.clone()
            } else if COOKIE_HEADERS.contains(&lower.as_str()) {
                mask_cookie(value, &mask)
            } else if let Some(sanitizer) = sanitizer {
                sanitizer
                    .apply(&json!({ lower.as_str(): value }))
                    .get(lower.as_str())
                    .and_then(Value::as_str)
                    .unwrap_or(value)
                    .to_string()
            } else if value.len() > LONG_TOKEN_LEN && token.as_ref().is_some_and(|re| re.is_match(value)) {
                let keep: String = value.chars().take(6).collect();
                format!("{keep}{mask}")
            } else {
                value.clone()
            };
            out.append(name, masked);
        }
    }
    out
}

fn mask_cookie(value: &str, mask: &str) -> String {
    value
        .split(';')
        .map(str::trim)
        .map(|part| match part.split_once('=') {
            Some((key, _)) if !COOKIE_ATTRIBUTES.contains(&key.trim().to_lowercase().as_str()) => {
                format!("{key}={mask}")
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Renders a response for the history: headers masked, JSON bodies passed
/// through `sanitizer` under a `payload` key, then pretty-printed and
/// truncated per `options`.
pub fn render_response(
    response: &ResponseDescription,
    sanitizer: Option<&Sanitizer>,
    options: &FormatOptions,
) -> String {
    let mask_char = sanitizer.map(Sanitizer::mask_character).unwrap_or('*');
    let mut headers = mask_headers(&response.headers.canonical(), sanitizer, mask_char);
    let is_json = headers
        .content_type()
        .is_some_and(|ct| ct.contains("application/json"));

    let body = match &response.body {
        Body::Structured(value) => Body::Structured(sanitize_payload(value, sanitizer)),
        Body::Text(text) if is_json => match serde_json::from_str::<Value>(text) {
            Ok(value @ (Value::Object(_) | Value::Array(_))) => {
                Body::Structured(sanitize_payload(&value, sanitizer))
            }
            _ => Body::Text(text.clone()),
        },
        other => other.clone(),
    };
    let rendered = serialize_body(&body, None, options.pretty_json);
    let rendered = truncate(rendered, options.truncate_body_to);

    if options.recompute_content_length {
        headers.insert("Content-Length", rendered.len().to_string());
    } else {
        headers.remove("Content-Length");
    }

    let start = format!(
        "HTTP/{} {} {}",
        response.http_version,
        response.status,
        response.reason_or_default()
    );
    assemble(start, &headers, &rendered)
}

fn sanitize_payload(value: &Value, sanitizer: Option<&Sanitizer>) -> Value {
    let Some(sanitizer) = sanitizer else {
        return value.clone();
    };
    sanitizer
        .apply(&json!({ "payload": value }))
        .get("payload")
        .cloned()
        .unwrap_or_else(|| value.clone())
}
