//! Runtime values produced and consumed by the expression executor.
//!
//! A [`Variant`] owns its payload. Conversions never coerce an error value
//! into something else; callers check [`Variant::is_error`] first.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Absolute tolerance used when comparing floating point values.
pub const DOUBLE_EPSILON: f64 = 0.000001;

/// Opaque payload owned by a collaborator (for example a cached history
/// series). The engine only moves it around.
#[derive(Clone)]
pub struct ExternalHandle(Arc<dyn Any + Send + Sync>);

impl ExternalHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for ExternalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExternalHandle(..)")
    }
}

impl PartialEq for ExternalHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Variant {
    #[default]
    None,
    Error(String),
    Str(String),
    UInt64(u64),
    Double(f64),
    #[serde(rename = "vector")]
    DoubleVector(Vec<f64>),
    #[serde(skip)]
    External(ExternalHandle),
}

/// Multiplier of a time (`s m h d w`) or byte (`K M G T`) suffix.
pub fn suffix_factor(c: char) -> Option<f64> {
    match c {
        's' => Some(1.0),
        'm' => Some(60.0),
        'h' => Some(3600.0),
        'd' => Some(86400.0),
        'w' => Some(604800.0),
        'K' => Some(1024.0),
        'M' => Some(1024.0 * 1024.0),
        'G' => Some(1024.0 * 1024.0 * 1024.0),
        'T' => Some(1024.0 * 1024.0 * 1024.0 * 1024.0),
        _ => None,
    }
}

/// Parse a plain decimal number: optional sign, digits with an optional
/// fraction, optional exponent. Words such as `inf` or `nan` are rejected.
pub fn parse_double(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        digits += i - frac_start;
    }
    if digits == 0 {
        return None;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        i += 1;
        if matches!(bytes.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return None;
        }
    }
    if i != bytes.len() {
        return None;
    }
    text.parse::<f64>().ok()
}

/// Parse a number with an optional trailing suffix (`5m`, `1K`, `0.5h`).
/// Only finite results are accepted.
pub fn parse_suffixed(text: &str) -> Option<f64> {
    let (number, factor) = match text.chars().last() {
        Some(c) => match suffix_factor(c) {
            Some(factor) => (&text[..text.len() - c.len_utf8()], factor),
            None => (text, 1.0),
        },
        None => return None,
    };
    let value = parse_double(number)? * factor;
    value.is_finite().then_some(value)
}

fn format_double(value: f64) -> String {
    format!("{}", value)
}

impl Variant {
    pub fn is_none(&self) -> bool {
        matches!(self, Variant::None)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Variant::Error(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Variant::None => "none",
            Variant::Error(_) => "error",
            Variant::Str(_) => "string",
            Variant::UInt64(_) => "uint64",
            Variant::Double(_) => "double",
            Variant::DoubleVector(_) => "vector",
            Variant::External(_) => "external",
        }
    }

    /// Human readable rendering used inside error messages.
    pub fn value_desc(&self) -> String {
        match self {
            Variant::None => String::new(),
            Variant::Error(message) => message.clone(),
            Variant::Str(s) => s.clone(),
            Variant::UInt64(v) => v.to_string(),
            Variant::Double(v) => format_double(*v),
            Variant::DoubleVector(values) => {
                let items: Vec<String> = values.iter().map(|v| format_double(*v)).collect();
                format!("[{}]", items.join(","))
            }
            Variant::External(_) => "<external>".to_string(),
        }
    }

    /// Convert to a double. Strings must hold a plain number.
    pub fn to_double(&self) -> Option<f64> {
        match self {
            Variant::UInt64(v) => Some(*v as f64),
            Variant::Double(v) => Some(*v),
            Variant::Str(s) => parse_double(s),
            _ => None,
        }
    }

    /// Convert to a double, accepting suffixed numbers in strings.
    pub fn to_double_suffixed(&self) -> Option<f64> {
        match self {
            Variant::Str(s) => parse_suffixed(s),
            other => other.to_double(),
        }
    }

    /// Convert to an unsigned integer. Doubles are truncated and must not be
    /// negative; strings are trimmed first.
    pub fn to_uint64(&self) -> Option<u64> {
        match self {
            Variant::UInt64(v) => Some(*v),
            Variant::Double(v) => double_to_uint64(*v),
            Variant::Str(s) => {
                let trimmed = s.trim();
                trimmed
                    .parse::<u64>()
                    .ok()
                    .or_else(|| parse_double(trimmed).and_then(double_to_uint64))
            }
            _ => None,
        }
    }

    /// Convert to text. Errors, vectors and external handles have no text form.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Variant::None => Some(String::new()),
            Variant::Str(s) => Some(s.clone()),
            Variant::UInt64(v) => Some(v.to_string()),
            Variant::Double(v) => Some(format_double(*v)),
            _ => None,
        }
    }

    /// Suffix-aware numeric form of a string, used for equality checks and
    /// user macro values. Non-strings are returned as they are.
    pub fn numeric_or_self(&self) -> Variant {
        if let Variant::Str(s) = self {
            if let Some(v) = parse_suffixed(s) {
                return Variant::Double(v);
            }
        }
        self.clone()
    }

    /// Total ordering used by the relational operators.
    ///
    /// `None` sorts first, two strings compare bytewise, two unsigned values
    /// compare exactly, values convertible to doubles compare with
    /// [`DOUBLE_EPSILON`] and anything else falls back to text comparison.
    pub fn compare(&self, other: &Variant) -> Ordering {
        match (self, other) {
            (Variant::None, Variant::None) => Ordering::Equal,
            (Variant::None, _) => Ordering::Less,
            (_, Variant::None) => Ordering::Greater,
            (Variant::Str(a), Variant::Str(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Variant::UInt64(a), Variant::UInt64(b)) => a.cmp(b),
            _ => match (self.to_double(), other.to_double()) {
                (Some(a), Some(b)) => compare_doubles(a, b),
                _ => self.value_desc().cmp(&other.value_desc()),
            },
        }
    }
}

fn double_to_uint64(value: f64) -> Option<u64> {
    if value.is_finite() && value >= 0.0 && value <= u64::MAX as f64 {
        Some(value as u64)
    } else {
        None
    }
}

pub fn compare_doubles(a: f64, b: f64) -> Ordering {
    if (a - b).abs() <= DOUBLE_EPSILON {
        Ordering::Equal
    } else if a < b {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value_desc())
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Variant::Double(value)
    }
}

impl From<u64> for Variant {
    fn from(value: u64) -> Self {
        Variant::UInt64(value)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::Str(value.to_string())
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::Str(value)
    }
}

impl From<Vec<f64>> for Variant {
    fn from(values: Vec<f64>) -> Self {
        Variant::DoubleVector(values)
    }
}
