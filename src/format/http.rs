//! Raw HTTP/1.x message rendering.

use url::Url;

use super::{Body, FormatOptions, Headers, RequestDescription, ResponseDescription};
use super::{form_encode, json_text, truncate};

/// Standard reason phrase, empty for codes without one.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}

/// Renders `METHOD target HTTP/x`, the headers, a blank line and the body.
pub fn build_request(request: &RequestDescription, options: &FormatOptions) -> String {
    let mut headers = request.headers.canonical();
    let body = serialize_body(&request.body, headers.content_type().as_deref(), options.pretty_json);
    let body = truncate(body, options.truncate_body_to);

    if options.recompute_content_length {
        if body.is_empty() {
            headers.remove("Content-Length");
        } else {
            headers.insert("Content-Length", body.len().to_string());
        }
    }

    let start = format!(
        "{} {} HTTP/{}",
        request.method.to_uppercase(),
        request_target(&request.url),
        request.http_version
    );
    assemble(start, &headers, &body)
}

/// Renders `HTTP/x status reason`, the headers, a blank line and the body.
pub fn build_response(response: &ResponseDescription, options: &FormatOptions) -> String {
    let mut headers = response.headers.canonical();
    let body = serialize_body(&response.body, headers.content_type().as_deref(), options.pretty_json);
    let body = truncate(body, options.truncate_body_to);

    if options.recompute_content_length {
        headers.insert("Content-Length", body.len().to_string());
    } else {
        headers.remove("Content-Length");
    }

    let start = format!(
        "HTTP/{} {} {}",
        response.http_version,
        response.status,
        response.reason_or_default()
    );
    assemble(start, &headers, &body)
}

pub(crate) fn assemble(start: String, headers: &Headers, body: &str) -> String {
    let mut lines = vec![start];
    for (name, values) in headers.iter() {
        for value in values {
            lines.push(format!("{name}: {value}"));
        }
    }
    lines.push(String::new());
    let mut out = lines.join("\r\n");
    out.push_str("\r\n");
    out.push_str(body);
    out
}

/// Structured bodies follow the content type: form encoding for
/// urlencoded forms, JSON for everything else.
pub(crate) fn serialize_body(body: &Body, content_type: Option<&str>, pretty: bool) -> String {
    match body {
        Body::Empty => String::new(),
        Body::Text(text) => text.clone(),
        Body::Structured(value) => match content_type {
            Some(ct) if ct.contains("application/x-www-form-urlencoded") => form_encode(value),
            _ => json_text(value, pretty),
        },
    }
}

/// Path and query of `url`; targets starting with `/` pass through.
fn request_target(url: &str) -> String {
    if url.starts_with('/') {
        return url.to_string();
    }
    match Url::parse(url) {
        Ok(parsed) => {
            let mut target = parsed.path().to_string();
            if target.is_empty() {
                target.push('/');
            }
            if let Some(query) = parsed.query().filter(|q| !q.is_empty()) {
                target.push('?');
                target.push_str(query);
            }
            target
        }
        Err(_) => url.to_string(),
    }
}
