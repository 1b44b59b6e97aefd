//! Bitwise functions over unsigned 64-bit values.

use super::to_uint;
use crate::variant::Variant;

pub(crate) fn binary(args: &[Variant], op: impl Fn(u64, u64) -> u64) -> Result<Variant, String> {
    let a = to_uint(&args[0])?;
    let b = to_uint(&args[1])?;
    Ok(Variant::UInt64(op(a, b)))
}

pub(crate) fn not(args: &[Variant]) -> Result<Variant, String> {
    Ok(Variant::UInt64(!to_uint(&args[0])?))
}
