//! String functions. Positions and lengths count characters, not bytes.

use super::{to_text, to_uint};
use crate::variant::{Variant, compare_doubles};
use std::cmp::Ordering;

/// Longest string `repeat` may produce.
pub(crate) const MAX_STRING_LEN: u64 = 2048;

const WHITESPACE: &str = " \t\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrimSide {
    Both,
    Left,
    Right,
}

fn char_count(s: &str) -> u64 {
    s.chars().count() as u64
}

pub(crate) fn length(args: &[Variant]) -> Result<Variant, String> {
    let s = to_text(&args[0])?;
    Ok(Variant::Double(char_count(&s) as f64))
}

pub(crate) fn left(args: &[Variant]) -> Result<Variant, String> {
    let s = to_text(&args[0])?;
    let n = to_uint(&args[1])?;
    Ok(Variant::Str(s.chars().take(n as usize).collect()))
}

pub(crate) fn right(args: &[Variant]) -> Result<Variant, String> {
    let s = to_text(&args[0])?;
    let n = to_uint(&args[1])?;
    let skip = char_count(&s).saturating_sub(n);
    Ok(Variant::Str(s.chars().skip(skip as usize).collect()))
}

pub(crate) fn mid(args: &[Variant]) -> Result<Variant, String> {
    let s = to_text(&args[0])?;
    let start = to_uint(&args[1])?;
    let len = to_uint(&args[2])?;
    if start == 0 || start > char_count(&s) {
        return Err("invalid function second argument".to_string());
    }
    Ok(Variant::Str(
        s.chars()
            .skip((start - 1) as usize)
            .take(len.min(usize::MAX as u64) as usize)
            .collect(),
    ))
}

pub(crate) fn concat(args: &[Variant]) -> Result<Variant, String> {
    let parts = args.iter().map(to_text).collect::<Result<Vec<_>, _>>()?;
    Ok(Variant::Str(parts.concat()))
}

/// `insert(s, start, len, replacement)` replaces `len` characters at the
/// 1-based `start`.
pub(crate) fn insert(args: &[Variant]) -> Result<Variant, String> {
    let s = to_text(&args[0])?;
    let start = to_uint(&args[1])?;
    let len = to_uint(&args[2])?;
    let replacement = to_text(&args[3])?;

    let total = char_count(&s);
    if start == 0 || start > total {
        return Err("invalid function second argument".to_string());
    }
    if (start - 1).checked_add(len).is_none_or(|end| end > total) {
        return Err("invalid function third argument".to_string());
    }

    let head = (start - 1) as usize;
    let tail = head + len as usize;
    let mut result: String = s.chars().take(head).collect();
    result.push_str(&replacement);
    result.extend(s.chars().skip(tail));
    Ok(Variant::Str(result))
}

pub(crate) fn replace(args: &[Variant]) -> Result<Variant, String> {
    let s = to_text(&args[0])?;
    let pattern = to_text(&args[1])?;
    let replacement = to_text(&args[2])?;
    if pattern.is_empty() {
        return Ok(Variant::Str(s));
    }
    Ok(Variant::Str(s.replace(&pattern, &replacement)))
}

pub(crate) fn repeat(args: &[Variant]) -> Result<Variant, String> {
    let s = to_text(&args[0])?;
    let n = to_uint(&args[1])?;
    let len = char_count(&s);
    if len == 0 {
        return Ok(Variant::Str(String::new()));
    }
    match n.checked_mul(len) {
        Some(total) if total < MAX_STRING_LEN => Ok(Variant::Str(s.repeat(n as usize))),
        total => Err(format!(
            "maximum allowed string length ({}) exceeded: {}",
            MAX_STRING_LEN,
            total.unwrap_or(u64::MAX)
        )),
    }
}

pub(crate) fn trim(args: &[Variant], side: TrimSide) -> Result<Variant, String> {
    let s = to_text(&args[0])?;
    let set = match args.get(1) {
        Some(chars) => to_text(chars)?,
        None => WHITESPACE.to_string(),
    };
    let strip = |c: char| set.contains(c);
    let trimmed = match side {
        TrimSide::Both => s.trim_matches(strip),
        TrimSide::Left => s.trim_start_matches(strip),
        TrimSide::Right => s.trim_end_matches(strip),
    };
    Ok(Variant::Str(trimmed.to_string()))
}

pub(crate) fn ascii(args: &[Variant]) -> Result<Variant, String> {
    let s = to_text(&args[0])?;
    match s.chars().next() {
        Some(c) if c.is_ascii() => Ok(Variant::UInt64(c as u64)),
        _ => Err(format!("invalid function argument \"{}\"", s)),
    }
}

pub(crate) fn char_from_code(args: &[Variant]) -> Result<Variant, String> {
    let code = to_uint(&args[0])?;
    match u8::try_from(code) {
        Ok(byte) if byte <= 127 => Ok(Variant::Str(char::from(byte).to_string())),
        _ => Err(format!(
            "function argument \"{}\" is out of allowed range",
            args[0].value_desc()
        )),
    }
}

/// Significant bytes of an unsigned value, or the byte length of a string.
pub(crate) fn byte_length(args: &[Variant]) -> Result<Variant, String> {
    if let Some(value) = args[0].to_uint64() {
        let bits = 64 - value.leading_zeros();
        return Ok(Variant::Double(bits.div_ceil(8) as f64));
    }
    let s = to_text(&args[0])?;
    Ok(Variant::Double(s.len() as f64))
}

/// Significant bits of an unsigned value, or the bit length of a string.
pub(crate) fn bit_length(args: &[Variant]) -> Result<Variant, String> {
    if let Some(value) = args[0].to_uint64() {
        return Ok(Variant::Double((64 - value.leading_zeros()) as f64));
    }
    let s = to_text(&args[0])?;
    Ok(Variant::Double((s.len() * 8) as f64))
}

/// `in(ref, v1, v2, ...)`: numeric comparison when every argument is a
/// number, text comparison otherwise.
pub(crate) fn contains(args: &[Variant]) -> Result<Variant, String> {
    let numbers: Option<Vec<f64>> = args
        .iter()
        .map(|a| a.to_double_suffixed().or_else(|| a.to_double()))
        .collect();

    let found = match numbers {
        Some(numbers) => numbers[1..]
            .iter()
            .any(|v| compare_doubles(numbers[0], *v) == Ordering::Equal),
        None => {
            let texts = args.iter().map(to_text).collect::<Result<Vec<_>, _>>()?;
            texts[1..].iter().any(|t| *t == texts[0])
        }
    };
    Ok(Variant::Double(if found { 1.0 } else { 0.0 }))
}
