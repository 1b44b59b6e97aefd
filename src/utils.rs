use std::collections::HashMap;
use std::str::FromStr;

/// `*` wildcard matching; every other character matches itself.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let (Some(prefix), Some(suffix)) = (parts.first(), parts.last()) else {
        return pattern == value;
    };
    if parts.len() == 1 {
        return pattern == value;
    }

    if !value.starts_with(prefix) {
        return false;
    }
    let mut remaining = &value[prefix.len()..];
    if !remaining.ends_with(suffix) {
        return false;
    }
    remaining = &remaining[..remaining.len() - suffix.len()];

    for part in parts[1..parts.len() - 1].iter().filter(|p| !p.is_empty()) {
        match remaining.find(part) {
            Some(idx) => {
                remaining = &remaining[idx + part.len()..];
            }
            None => return false,
        }
    }

    true
}

/// A `name[:value]` tag condition as written in group/tag filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMatch {
    pub tag: String,
    pub value: Option<String>,
}

impl FromStr for TagMatch {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (tag, tag_value) = match value.split_once(':') {
            Some((tag, tag_value)) => (tag, Some(tag_value.to_string())),
            None => (value, None),
        };
        if tag.is_empty() {
            return Err(format!("invalid tag: {value}"));
        }
        Ok(TagMatch {
            tag: tag.to_string(),
            value: tag_value,
        })
    }
}

pub fn build_tag_map<'a, I>(tags: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a TagMatch>,
{
    tags.map(|t| (t.tag.clone(), t.value.clone().unwrap_or_default()))
        .collect()
}

/// The tag must exist; when a value is given it is matched as a glob.
pub fn matches_tag(tag_match: &TagMatch, tags: &HashMap<String, String>) -> bool {
    let Some(tag_val) = tags.get(&tag_match.tag) else {
        return false;
    };

    match &tag_match.value {
        Some(pattern) => glob_match(pattern, tag_val),
        None => true,
    }
}
