//! Shell-ready `curl` rendering of a request.

use serde_json::Value;

use super::{Body, RequestDescription, raw_url_encode, scalar_to_string};

const LINE_JOINER: &str = " \\\n  ";

/// Renders `request` as a multi-line curl command. GET bodies are folded
/// into the query string; values made only of `mask_char` stay unencoded
/// so masks remain readable.
pub fn build_curl(request: &RequestDescription, mask_char: char) -> String {
    let method = request.method.to_uppercase();
    let mut url = request.url.clone();
    let content_type = request.headers.content_type();

    if method == "GET" {
        url = append_query(&url, &request.body, mask_char);
    }

    let mut parts = vec![
        "curl".to_string(),
        "-sS".to_string(),
        format!("-X {}", shell_quote(&method)),
    ];
    for (name, values) in request.headers.iter() {
        parts.push(format!("-H {}", shell_quote(&format!("{name}: {}", values.join(", ")))));
    }
    if method != "GET" {
        parts.extend(body_flags(&request.body, content_type.as_deref()));
    }
    parts.push(shell_quote(&url));
    parts.join(LINE_JOINER)
}

/// POSIX single-quote escaping.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

fn append_query(url: &str, body: &Body, mask_char: char) -> String {
    let query = match body {
        Body::Empty => return url.to_string(),
        Body::Text(text) => text.trim_start_matches(['?', '&']).to_string(),
        Body::Structured(value) => entries(value)
            .into_iter()
            .map(|(key, value)| {
                let text = leaf_text(&value);
                let encoded = if is_pure_mask(&text, mask_char) {
                    text
                } else {
                    raw_url_encode(&text)
                };
                format!("{}={encoded}", raw_url_encode(&key))
            })
            .collect::<Vec<_>>()
            .join("&"),
    };
    if query.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}

fn body_flags(body: &Body, content_type: Option<&str>) -> Vec<String> {
    match body {
        Body::Empty => Vec::new(),
        Body::Text(text) => vec![format!("--data {}", shell_quote(text))],
        Body::Structured(value) => match content_type {
            Some(ct) if ct.contains("application/json") => {
                vec![format!("--data {}", shell_quote(&value.to_string()))]
            }
            Some(ct) if ct.contains("multipart/form-data") => multipart_flags(value),
            _ => {
                let pairs: Vec<String> = entries(value)
                    .into_iter()
                    .map(|(key, value)| format!("{key}={}", leaf_text(&value)))
                    .collect();
                vec![format!("--data {}", shell_quote(&pairs.join("&")))]
            }
        },
    }
}

/// One `-F` per field; lists repeat the field as `key[]`.
fn multipart_flags(value: &Value) -> Vec<String> {
    fn flatten(key: &str, value: &Value, flags: &mut Vec<String>) {
        match value {
            Value::Array(items) => {
                for item in items {
                    flatten(&format!("{key}[]"), item, flags);
                }
            }
            Value::Object(map) => {
                for item in map.values() {
                    flatten(&format!("{key}[]"), item, flags);
                }
            }
            leaf => flags.push(format!("-F {}", shell_quote(&format!("{key}={}", scalar_to_string(leaf))))),
        }
    }

    let mut flags = Vec::new();
    for (key, value) in entries(value) {
        flatten(&key, &value, &mut flags);
    }
    flags
}

/// Top-level fields of a structure; list items are keyed by position.
fn entries(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

fn leaf_text(value: &Value) -> String {
    match value {
        Value::Array(_) | Value::Object(_) => value.to_string(),
        scalar => scalar_to_string(scalar),
    }
}

fn is_pure_mask(value: &str, mask_char: char) -> bool {
    !value.is_empty() && value.chars().all(|c| c == mask_char)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Headers;
    use serde_json::json;

    #[test]
    fn post_json() {
        let request = RequestDescription::new("post", "https://api.test/orders")
            .headers(Headers::from_lines(["Content-Type: application/json", "Authorization: Bearer ********"]))
            .body(Body::Structured(json!({ "ref": "it's", "n": 2 })));
        assert_eq!(
            build_curl(&request, '*'),
            "curl \\\n  -sS \\\n  -X 'POST' \\\n  \
             -H 'Content-Type: application/json' \\\n  \
             -H 'Authorization: Bearer ********' \\\n  \
             --data '{\"ref\":\"it'\\''s\",\"n\":2}' \\\n  \
             'https://api.test/orders'"
        );
    }

    #[test]
    fn get_folds_payload_into_query_and_keeps_masks() {
        let request = RequestDescription::new("GET", "https://api.test/search?page=1")
            .body(Body::Structured(json!({ "q": "a b", "token": "********", "tags": ["x"] })));
        let text = build_curl(&request, '*');
        assert!(!text.contains("--data"));
        assert!(text.ends_with(
            "'https://api.test/search?page=1&q=a%20b&token=********&tags=%5B%22x%22%5D'"
        ));
    }

    #[test]
    fn get_with_query_string_body() {
        let request = RequestDescription::new("GET", "/search").body(Body::Text("?q=1".into()));
        assert!(build_curl(&request, '*').ends_with("'/search?q=1'"));
    }

    #[test]
    fn default_structured_body_is_form_like() {
        let request = RequestDescription::new("PUT", "/x")
            .body(Body::Structured(json!({ "a": "1", "b": true, "c": { "d": 1 } })));
        assert!(build_curl(&request, '*').contains("--data 'a=1&b=1&c={\"d\":1}'"));
    }

    #[test]
    fn multipart_uses_form_flags() {
        let request = RequestDescription::new("POST", "/upload")
            .header("Content-Type", "multipart/form-data; boundary=x")
            .body(Body::Structured(json!({ "name": "doc", "tags": ["a", "b"] })));
        let text = build_curl(&request, '*');
        assert!(text.contains("-F 'name=doc' \\\n  -F 'tags[]=a' \\\n  -F 'tags[]=b'"));
    }
}
