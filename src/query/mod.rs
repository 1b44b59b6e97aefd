//! Item queries and group filters.
//!
//! An item query `/host/key?[filter]` names one or more monitored items:
//!
//! ```text
//! /web01/system.cpu.load[all,avg1]
//! //vfs.fs.size[/,free]                 any host
//! /*/net.if.in[*]?[group = "Linux"]     any host, filtered by group/tag
//! ```
//!
//! The filter part uses the query expression grammar. [`compute_group_filter`]
//! reduces it to the group conditions storage can pre-filter on.

mod filter;

pub use filter::{GroupFilterResult, compute_group_filter, prepare_property_filter};

use serde::Serialize;

use crate::dsl::lexer::{scan_braces, scan_string, unquote};
use crate::utils::glob_match;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemQuery {
    /// `None` when the host part is empty, meaning any host.
    pub host: Option<String>,
    pub key: String,
    pub filter: Option<String>,
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '*')
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Length of the host part: host name characters and macros.
fn scan_host(text: &str) -> Option<usize> {
    let mut pos = 0;
    while let Some(c) = text[pos..].chars().next() {
        if c == '{' {
            pos += scan_braces(&text[pos..])?;
        } else if is_host_char(c) {
            pos += c.len_utf8();
        } else {
            break;
        }
    }
    Some(pos)
}

/// Length of a `[...]` block starting at `text`, honoring quoted strings and
/// nested brackets.
fn scan_brackets(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut pos = 0;
    while let Some(c) = text[pos..].chars().next() {
        match c {
            '"' => {
                pos += scan_string(&text[pos..]).ok()?;
                continue;
            }
            '[' => depth += 1,
            ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(pos + 1);
                }
            }
            _ => {}
        }
        pos += c.len_utf8();
    }
    None
}

/// Length of the key part: key name plus optional bracketed parameters.
fn scan_key(text: &str) -> Option<usize> {
    let name = text
        .find(|c: char| !is_key_char(c))
        .unwrap_or(text.len());
    if name == 0 {
        return None;
    }
    if text[name..].starts_with('[') {
        Some(name + scan_brackets(&text[name..])?)
    } else {
        Some(name)
    }
}

/// Length of the item query at the start of `text`, or `None` when `text`
/// does not start with a well formed query.
pub fn scan_item_query(text: &str) -> Option<usize> {
    let rest = text.strip_prefix('/')?;
    let host = scan_host(rest)?;
    let mut pos = 1 + host;
    if !text[pos..].starts_with('/') {
        return None;
    }
    pos += 1;
    pos += scan_key(&text[pos..])?;
    if text[pos..].starts_with("?[") {
        pos += 1 + scan_brackets(&text[pos + 1..])?;
    }
    Some(pos)
}

/// Split a `/host/key?[filter]` literal. The whole text must be a query.
pub fn parse_item_query(text: &str) -> Option<ItemQuery> {
    if scan_item_query(text)? != text.len() {
        return None;
    }
    let rest = &text[1..];
    let host_len = scan_host(rest)?;
    let host = &rest[..host_len];
    let after_host = &rest[host_len + 1..];
    let key_len = scan_key(after_host)?;
    let key = &after_host[..key_len];
    let filter = after_host[key_len..]
        .strip_prefix("?[")
        .and_then(|f| f.strip_suffix(']'));

    Some(ItemQuery {
        host: (!host.is_empty()).then(|| host.to_string()),
        key: key.to_string(),
        filter: filter.map(str::to_string),
    })
}

/// Split an item key into its name and unquoted parameters.
pub fn split_key(key: &str) -> (&str, Vec<String>) {
    let Some(open) = key.find('[') else {
        return (key, Vec::new());
    };
    let name = &key[..open];
    let body = key[open + 1..].strip_suffix(']').unwrap_or(&key[open + 1..]);

    let mut params = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut pos = 0;
    while let Some(c) = body[pos..].chars().next() {
        match c {
            '"' => {
                pos += scan_string(&body[pos..]).unwrap_or(body.len() - pos);
                continue;
            }
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                params.push(param_value(&body[start..pos]));
                start = pos + 1;
            }
            _ => {}
        }
        pos += c.len_utf8();
    }
    params.push(param_value(&body[start..]));
    (name, params)
}

fn param_value(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') {
        unquote(trimmed)
    } else {
        trimmed.to_string()
    }
}

impl ItemQuery {
    /// Whether an item identified by `host` and `key` is selected by this
    /// query. Host and key parameters may use `*` wildcards; the key name
    /// must match exactly. The filter part is not considered.
    pub fn matches(&self, host: &str, key: &str) -> bool {
        if let Some(pattern) = &self.host {
            if !glob_match(pattern, host) {
                return false;
            }
        }

        let (name, params) = split_key(&self.key);
        let (candidate_name, candidate_params) = split_key(key);
        name == candidate_name
            && params.len() == candidate_params.len()
            && params
                .iter()
                .zip(&candidate_params)
                .all(|(pattern, value)| glob_match(pattern, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_stops_after_query() {
        assert_eq!(scan_item_query("/host/key, 5m)"), Some(9));
        assert_eq!(scan_item_query("/host/key[a,\"b]\"] > 1"), Some(17));
        assert_eq!(scan_item_query("//key?[tag = \"a]\"]) + 1"), Some(18));
        assert_eq!(scan_item_query("/{HOST.HOST}/key"), Some(16));
        assert_eq!(scan_item_query("/host"), None);
        assert_eq!(scan_item_query("/host/"), None);
        assert_eq!(scan_item_query("/host/key[a"), None);
    }

    #[test]
    fn test_parse_full_query() {
        let query = parse_item_query("/web01/system.cpu.load[all,avg1]?[group=\"Linux\"]").unwrap();
        assert_eq!(query.host.as_deref(), Some("web01"));
        assert_eq!(query.key, "system.cpu.load[all,avg1]");
        assert_eq!(query.filter.as_deref(), Some("group=\"Linux\""));
    }

    #[test]
    fn test_parse_any_host() {
        let query = parse_item_query("//vfs.fs.size[/,free]").unwrap();
        assert_eq!(query.host, None);
        assert_eq!(query.key, "vfs.fs.size[/,free]");
        assert_eq!(query.filter, None);
    }

    #[test]
    fn test_parse_rejects_trailing_text() {
        assert!(parse_item_query("/host/key extra").is_none());
        assert!(parse_item_query("host/key").is_none());
    }

    #[test]
    fn test_split_key() {
        let (name, params) = split_key("net.if.in[\"eth0, x\",bytes]");
        assert_eq!(name, "net.if.in");
        assert_eq!(params, vec!["eth0, x".to_string(), "bytes".to_string()]);
        assert_eq!(split_key("agent.ping"), ("agent.ping", vec![]));
        assert_eq!(split_key("key[]").1, vec![String::new()]);
    }

    #[test]
    fn test_matches_with_wildcards() {
        let query = parse_item_query("/web*/vfs.fs.size[*,free]").unwrap();
        assert!(query.matches("web01", "vfs.fs.size[/,free]"));
        assert!(query.matches("web02", "vfs.fs.size[\"/var\",free]"));
        assert!(!query.matches("db01", "vfs.fs.size[/,free]"));
        assert!(!query.matches("web01", "vfs.fs.size[/,used]"));
        assert!(!query.matches("web01", "vfs.fs.size[/]"));
        let any = parse_item_query("//agent.ping").unwrap();
        assert!(any.matches("anything", "agent.ping"));
    }
}
