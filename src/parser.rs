use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::bucket::{parse_cidr, RuleBucket};
use crate::types::{RuleKind, SourceFormat};

/// Regex pattern for clash rule lines
/// Format: TYPE,VALUE[,POLICY][,no-resolve]
static RULE_LINE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9\-]*)\s*,\s*([^,]*)")
        .expect("RULE_LINE_PATTERN: hardcoded regex is invalid")
});

/// Strict sing-box rule-set source shape: `{"version": <int>, "rules": [...]}`
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSetSource {
    pub version: i64,
    pub rules: Vec<Value>,
}

/// Result of a structural (JSON, then YAML) parse of raw source text
#[derive(Debug, Clone)]
pub enum Document {
    /// Already a sing-box rule-set source
    RuleSet(RuleSetSource),
    /// Object carrying a `payload` or `rules` list
    Keyed {
        key: &'static str,
        items: Vec<Value>,
    },
    /// Top-level list
    List(Vec<Value>),
    /// Any other object
    Object,
    /// Scalar, empty, or not structured at all
    Text,
}

impl Document {
    /// Parse raw text as JSON, falling back to YAML.
    ///
    /// Never fails: malformed input is classified as `Text`.
    pub fn parse(text: &str) -> Self {
        let text = strip_bom(text);
        let value = match serde_json::from_str::<Value>(text) {
            Ok(v) => v,
            Err(_) => match serde_yaml::from_str::<Value>(text) {
                Ok(v) => v,
                Err(e) => {
                    debug!("source is not structured: {}", e);
                    return Document::Text;
                }
            },
        };
        Self::from_value(value)
    }

    fn from_value(value: Value) -> Self {
        if value.is_object() {
            if let Ok(source) = RuleSetSource::deserialize(&value) {
                return Document::RuleSet(source);
            }
        }

        match value {
            Value::Object(mut map) => {
                for key in ["payload", "rules"] {
                    if let Some(Value::Array(items)) = map.remove(key) {
                        return Document::Keyed { key, items };
                    }
                }
                Document::Object
            }
            Value::Array(items) => Document::List(items),
            _ => Document::Text,
        }
    }
}

/// Drop a leading UTF-8 byte order mark.
pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

/// Iterate over content lines: trimmed, non-empty, not `#` comments.
pub fn content_lines(text: &str) -> impl Iterator<Item = &str> {
    strip_bom(text)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Strip list markers, `['...']` wrappers and matching quotes from a rule item.
pub fn clean_item(item: &str) -> &str {
    let mut s = item.trim().trim_start_matches('-').trim();

    if let Some(inner) = s.strip_prefix("['").and_then(|r| r.strip_suffix("']")) {
        s = inner.trim();
    }

    for quote in ['\'', '"'] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            s = s[1..s.len() - 1].trim();
        }
    }

    s
}

/// Split a rule line into its first two comma-separated fields.
///
/// Trailing policy or `no-resolve` fields are discarded.
pub fn split_rule_line(line: &str) -> Option<(&str, &str)> {
    let captures = RULE_LINE_PATTERN.captures(line)?;
    let rule_type = captures.get(1)?.as_str();
    let value = captures.get(2)?.as_str().trim();
    Some((rule_type, value))
}

/// A clash rule line whose type is one of the extracted matcher kinds
pub fn parse_rule_line(line: &str) -> Option<(RuleKind, &str)> {
    let (rule_type, value) = split_rule_line(line)?;
    let kind = RuleKind::from_clash_type(rule_type)?;
    Some((kind, value))
}

/// Whether a string is a CIDR (must contain `/`)
pub fn looks_like_cidr(s: &str) -> bool {
    s.contains('/') && s.parse::<ipnet::IpNet>().is_ok()
}

/// Loose domain check used by format detection
pub fn looks_like_domain(s: &str) -> bool {
    s.contains('.') && !s.contains(|c: char| c.is_whitespace() || c == ',' || c == '/')
}

/// Domain check applied to domain-text entries
fn is_bare_domain(s: &str) -> bool {
    s.contains('.') && !s.contains(|c: char| c.is_whitespace() || c == '/' || c == ':')
}

/// Extract a rule bucket from raw text already classified as `format`.
pub fn extract(format: SourceFormat, text: &str) -> RuleBucket {
    extract_document(format, &Document::parse(text), text)
}

/// Extract using an already parsed document.
pub fn extract_document(format: SourceFormat, doc: &Document, text: &str) -> RuleBucket {
    match format {
        SourceFormat::Clash => extract_clash(doc, text),
        SourceFormat::DomainText => extract_domain_text(text),
        SourceFormat::IpText => extract_ip_text(text),
        SourceFormat::SingboxJson => extract_singbox(doc),
    }
}

/// A payload item as text.
///
/// YAML reads `- ['TYPE,VALUE']` as a one-element flow sequence, so a
/// single-string list counts as that string.
fn item_str(item: &Value) -> Option<&str> {
    match item {
        Value::String(s) => Some(s),
        Value::Array(inner) if inner.len() == 1 => inner[0].as_str(),
        _ => None,
    }
}

/// Candidate rule lines for clash extraction
fn clash_lines<'a>(doc: &'a Document, text: &'a str) -> Vec<&'a str> {
    let items = match doc {
        Document::Keyed { items, .. } | Document::List(items) => items.as_slice(),
        Document::RuleSet(source) => source.rules.as_slice(),
        Document::Object => return Vec::new(),
        Document::Text => return content_lines(text).map(clean_item).collect(),
    };

    items
        .iter()
        .filter_map(item_str)
        .map(clean_item)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

fn extract_clash(doc: &Document, text: &str) -> RuleBucket {
    let mut bucket = RuleBucket::new();
    let mut dropped = 0usize;

    for line in clash_lines(doc, text) {
        match parse_rule_line(line) {
            Some((kind, value)) => {
                bucket.insert(kind, value);
            }
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!("dropped {} unsupported clash rule lines", dropped);
    }
    bucket
}

fn extract_domain_text(text: &str) -> RuleBucket {
    let mut bucket = RuleBucket::new();

    for line in content_lines(text).map(clean_item) {
        let (kind, value) = if line.contains(',') {
            match split_rule_line(line) {
                Some((t, v)) if t.eq_ignore_ascii_case("DOMAIN") => (RuleKind::Domain, v),
                Some((t, v)) if t.eq_ignore_ascii_case("DOMAIN-SUFFIX") => {
                    (RuleKind::DomainSuffix, v)
                }
                _ => continue,
            }
        } else {
            (RuleKind::DomainSuffix, line)
        };

        let value = value.strip_prefix('+').unwrap_or(value);
        if is_bare_domain(value) {
            bucket.insert(kind, value);
        }
    }

    bucket
}

fn extract_ip_text(text: &str) -> RuleBucket {
    let mut bucket = RuleBucket::new();

    for line in content_lines(text).map(clean_item) {
        let value = if line.contains(',') {
            match parse_rule_line(line) {
                Some((kind, v)) if kind.is_cidr() => v,
                _ => continue,
            }
        } else {
            line
        };

        // Family is taken from the parsed network, not the rule type
        if let Some(net) = parse_cidr(value) {
            let kind = match net {
                ipnet::IpNet::V4(_) => RuleKind::IpCidr,
                ipnet::IpNet::V6(_) => RuleKind::IpCidr6,
            };
            bucket.insert(kind, value);
        }
    }

    bucket
}

fn extract_singbox(doc: &Document) -> RuleBucket {
    let rules = match doc {
        Document::RuleSet(source) => source.rules.as_slice(),
        Document::Keyed { key: "rules", items } | Document::List(items) => items.as_slice(),
        _ => return RuleBucket::new(),
    };

    let mut bucket = RuleBucket::new();

    for (idx, rule) in rules.iter().enumerate() {
        let Some(obj) = rule.as_object() else {
            debug!("skipping non-object rules[{}]", idx);
            continue;
        };

        // Logical and inverted rules cannot be flattened into one bucket
        let rule_type = obj.get("type").and_then(Value::as_str).unwrap_or("default");
        if rule_type != "default" || obj.get("invert").and_then(Value::as_bool) == Some(true) {
            debug!("skipping {} rule rules[{}]", rule_type, idx);
            continue;
        }

        for (field, value) in obj {
            let Some(kind) = RuleKind::from_field_name(field) else {
                continue;
            };
            match value {
                Value::String(s) => {
                    bucket.insert(kind, s);
                }
                Value::Array(items) => {
                    for s in items.iter().filter_map(Value::as_str) {
                        bucket.insert(kind, s);
                    }
                }
                _ => {}
            }
        }
    }

    bucket
}
