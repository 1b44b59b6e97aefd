//! Scalar math functions.

use super::{finite, numeric_args};
use crate::variant::Variant;

/// Accepted input range of a single-argument function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Domain {
    Any,
    Positive,
    NonNegative,
    NonZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Binary {
    Round,
    Truncate,
    Power,
    Mod,
    Atan2,
}

pub(crate) fn signum(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

pub(crate) fn unary(args: &[Variant], func: impl Fn(f64) -> f64, domain: Domain) -> Result<Variant, String> {
    let values = numeric_args(args)?;
    let [x] = values[..] else {
        return Err("invalid number of arguments for function".to_string());
    };
    let allowed = match domain {
        Domain::Any => true,
        Domain::Positive => x > 0.0,
        Domain::NonNegative => x >= 0.0,
        Domain::NonZero => x != 0.0,
    };
    if !allowed {
        return Err(format!("invalid argument \"{}\" for function", x));
    }
    finite(func(x))
}

fn scale(digits: f64) -> f64 {
    10f64.powf(digits)
}

pub(crate) fn binary(args: &[Variant], op: Binary) -> Result<Variant, String> {
    let values = numeric_args(args)?;
    let [a, b] = values[..] else {
        return Err("invalid number of arguments for function".to_string());
    };

    let precision_ok = b >= 0.0 && b.fract() == 0.0;
    if (matches!(op, Binary::Round | Binary::Truncate) && !precision_ok)
        || (op == Binary::Mod && b == 0.0)
    {
        return Err("invalid second argument for function".to_string());
    }
    if op == Binary::Atan2 && a == 0.0 && b == 0.0 {
        return Err("undefined result for arguments (0,0) for function 'atan2'".to_string());
    }

    let result = match op {
        Binary::Round => (a * scale(b)).round() / scale(b),
        Binary::Truncate => (a * scale(b)).trunc() / scale(b),
        Binary::Power => a.powf(b),
        Binary::Mod => a % b,
        Binary::Atan2 => a.atan2(b),
    };
    finite(result)
}

/// `between(x, low, high)` yields 1 when `low <= x <= high`.
pub(crate) fn between(args: &[Variant]) -> Result<Variant, String> {
    let values = numeric_args(args)?;
    let [x, low, high] = values[..] else {
        return Err("invalid number of arguments for function".to_string());
    };
    let inside = low <= x && x <= high;
    Ok(Variant::Double(if inside { 1.0 } else { 0.0 }))
}

/// Non-negative random 31-bit integer.
pub(crate) fn random() -> f64 {
    (rand::random::<u32>() & 0x7fff_ffff) as f64
}
