//! Masking of sensitive fields before request and response descriptions
//! reach the status history.

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Number, Value, json};
use url::Url;

use crate::error::ConfigError;
use crate::format::raw_url_encode;

/// Default preserve rule: keep the auth scheme of an `authorization` value.
pub const AUTH_SCHEME_PREFIX: &str = r"^\s*\w+\s+";

const RELATIVE_BASE: &str = "http://relative.invalid";

/// Configurable field masker. Build it with the chained setters or from a
/// [`SanitizerConfig`].
#[derive(Debug, Clone)]
pub struct Sanitizer {
    keys: Vec<String>,
    paths: Vec<Vec<String>>,
    regex: Vec<Regex>,
    url_query: Vec<String>,
    preserve_prefix: IndexMap<String, Regex>,
    mask_char: char,
    mask_len: usize,
    url_path_pattern: Option<String>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        let mut preserve_prefix = IndexMap::new();
        if let Ok(scheme) = Regex::new(AUTH_SCHEME_PREFIX) {
            preserve_prefix.insert("authorization".to_string(), scheme);
        }
        Self {
            keys: Vec::new(),
            paths: Vec::new(),
            regex: Vec::new(),
            url_query: Vec::new(),
            preserve_prefix,
            mask_char: '*',
            mask_len: 8,
            url_path_pattern: None,
        }
    }
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Field names masked wherever they appear. Case-insensitive.
    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keys = keys.into_iter().map(|k| k.as_ref().to_lowercase()).collect();
        self
    }

    /// Dot-separated paths from the root, e.g. `payload.card.number`.
    pub fn paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.paths = paths
            .into_iter()
            .map(|p| p.as_ref().split('.').map(str::to_lowercase).collect())
            .collect();
        self
    }

    /// Patterns tested against field names as they appear in the data.
    pub fn regex<I, S>(mut self, patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.regex = patterns
            .into_iter()
            .map(|p| compile("regex", p.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    /// Query parameters of the top-level `url` whose values are masked.
    pub fn url_query<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.url_query = names.into_iter().map(|n| n.as_ref().to_lowercase()).collect();
        self
    }

    /// Keeps whatever `pattern` matches at the start of `field` and masks the rest.
    pub fn preserve_prefix(mut self, field: &str, pattern: &str) -> Result<Self, ConfigError> {
        let regex = compile("preserve_prefix", pattern)?;
        self.preserve_prefix.insert(field.to_lowercase(), regex);
        Ok(self)
    }

    /// Drops every preserve rule, including the default one for `authorization`.
    pub fn without_preserve_prefix(mut self) -> Self {
        self.preserve_prefix.clear();
        self
    }

    pub fn mask_char(mut self, mask_char: char) -> Self {
        self.mask_char = mask_char;
        self
    }

    /// Length of the mask token, at least three.
    pub fn mask_len(mut self, mask_len: usize) -> Self {
        self.mask_len = mask_len;
        self
    }

    /// Template such as `/users/{mask}/orders/{mask}`; segments at `{mask}`
    /// positions of the `url` path are masked.
    pub fn url_path_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.url_path_pattern = Some(pattern.into());
        self
    }

    pub fn mask_character(&self) -> char {
        self.mask_char
    }

    /// The replacement written for a masked string.
    pub fn mask_token(&self) -> String {
        self.mask_char.to_string().repeat(self.mask_len.max(3))
    }

    /// Returns a masked copy of `data`.
    pub fn apply(&self, data: &Value) -> Value {
        let mut data = data.clone();
        if let Some(Value::String(url)) = data.get_mut("url") {
            let mut masked = self.mask_url_path(url);
            masked = self.mask_url_query(&masked);
            *url = masked;
        }
        self.walk(data, &[])
    }

    fn walk(&self, value: Value, path: &[String]) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, child) in map {
                    let lower = key.to_lowercase();
                    let child_path = extend(path, lower.clone());
                    let masked = self.matches_key(&key, &lower) || self.matches_path(&child_path);
                    let child = if masked {
                        self.mask_value(&lower, child)
                    } else {
                        self.descend(child, &child_path)
                    };
                    out.insert(key, child);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(index, child)| {
                        let child_path = extend(path, index.to_string());
                        if self.matches_path(&child_path) {
                            self.mask_value("", child)
                        } else {
                            self.descend(child, &child_path)
                        }
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    fn descend(&self, value: Value, path: &[String]) -> Value {
        match value {
            Value::Object(_) | Value::Array(_) => self.walk(value, path),
            other => other,
        }
    }

    fn matches_key(&self, key: &str, lower: &str) -> bool {
        self.keys.iter().any(|k| k == lower) || self.regex.iter().any(|r| r.is_match(key))
    }

    fn matches_path(&self, path: &[String]) -> bool {
        self.paths.iter().any(|p| p.as_slice() == path)
    }

    fn mask_value(&self, field: &str, value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.mask_string(field, &s)),
            Value::Number(_) => Value::Number(self.mask_number()),
            Value::Object(_) | Value::Array(_) => json!({ "masked": true }),
            other => other,
        }
    }

    fn mask_string(&self, field: &str, value: &str) -> String {
        if let Some(prefix) = self
            .preserve_prefix
            .get(field)
            .and_then(|rule| rule.find(value))
            .filter(|m| m.start() == 0)
        {
            return format!("{}{}", prefix.as_str(), self.mask_token());
        }
        self.mask_token()
    }

    fn mask_number(&self) -> Number {
        let digits = self.mask_len.clamp(1, 18);
        let nines = "9".repeat(digits);
        Number::from(nines.parse::<u64>().unwrap_or(u64::MAX))
    }

    fn mask_url_path(&self, url: &str) -> String {
        let Some(pattern) = self.url_path_pattern.as_deref() else {
            return url.to_string();
        };
        let Some((mut parsed, relative)) = parse_url(url) else {
            return url.to_string();
        };
        let template: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        let token = self.mask_token();
        let masked: Vec<String> = parsed
            .path()
            .split('/')
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(i, seg)| match template.get(i) {
                Some(&"{mask}") => token.clone(),
                _ => seg.to_string(),
            })
            .collect();
        parsed.set_path(&format!("/{}", masked.join("/")));
        render(&parsed, relative)
    }

    fn mask_url_query(&self, url: &str) -> String {
        if self.url_query.is_empty() {
            return url.to_string();
        }
        let Some((mut parsed, relative)) = parse_url(url) else {
            return url.to_string();
        };
        let mut changed = false;
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| {
                if self.url_query.contains(&k.to_lowercase()) {
                    changed = true;
                    (k.into_owned(), self.mask_token())
                } else {
                    (k.into_owned(), v.into_owned())
                }
            })
            .collect();
        if !changed {
            return url.to_string();
        }
        // RFC 3986 encoding; the mask itself stays readable like in curl output.
        let token = self.mask_token();
        let query = pairs
            .iter()
            .map(|(key, value)| {
                let value = if *value == token {
                    value.clone()
                } else {
                    raw_url_encode(value)
                };
                format!("{}={value}", raw_url_encode(key))
            })
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
        render(&parsed, relative)
    }
}

fn compile(key: &'static str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|err| ConfigError::Invalid {
        key,
        message: err.to_string(),
    })
}

fn extend(path: &[String], segment: String) -> Vec<String> {
    let mut out = path.to_vec();
    out.push(segment);
    out
}

/// Parses absolute URLs directly and request targets against a placeholder host.
fn parse_url(url: &str) -> Option<(Url, bool)> {
    match Url::parse(url) {
        Ok(parsed) => Some((parsed, false)),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(RELATIVE_BASE).ok()?;
            base.join(url).ok().map(|parsed| (parsed, true))
        }
        Err(_) => None,
    }
}

fn render(url: &Url, relative: bool) -> String {
    if !relative {
        return url.to_string();
    }
    let mut out = url.path().to_string();
    if let Some(query) = url.query() {
        out.push('?');
        out.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// Serialized form of a [`Sanitizer`], e.g. a `[sanitizer]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    pub keys: Vec<String>,
    pub paths: Vec<String>,
    pub regex: Vec<String>,
    pub url_query: Vec<String>,
    /// Replaces the default preserve rules when present.
    pub preserve_prefix: Option<IndexMap<String, String>>,
    pub mask_char: Option<char>,
    pub mask_len: Option<usize>,
    pub url_path_pattern: Option<String>,
}

impl TryFrom<SanitizerConfig> for Sanitizer {
    type Error = ConfigError;

    fn try_from(config: SanitizerConfig) -> Result<Self, Self::Error> {
        let mut sanitizer = Sanitizer::new()
            .keys(&config.keys)
            .paths(&config.paths)
            .url_query(&config.url_query)
            .regex(&config.regex)?;
        if let Some(rules) = config.preserve_prefix {
            sanitizer = sanitizer.without_preserve_prefix();
            for (field, pattern) in &rules {
                sanitizer = sanitizer.preserve_prefix(field, pattern)?;
            }
        }
        if let Some(mask_char) = config.mask_char {
            sanitizer = sanitizer.mask_char(mask_char);
        }
        if let Some(mask_len) = config.mask_len {
            sanitizer = sanitizer.mask_len(mask_len);
        }
        if let Some(pattern) = config.url_path_pattern {
            sanitizer = sanitizer.url_path_pattern(pattern);
        }
        Ok(sanitizer)
    }
}
