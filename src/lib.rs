//! Expression engine for monitoring triggers, calculated items and
//! tag/group filters.
//!
//! ```
//! use monexpr::dsl::{EvalContext, Rules, Timestamp};
//! use monexpr::variant::Variant;
//!
//! let ctx = EvalContext::parse("1K + 1K", Rules::BASIC_MATH).unwrap();
//! assert_eq!(ctx.execute(&Timestamp::from_secs(0)).unwrap(), Variant::Double(2048.0));
//! ```

pub mod config;
pub mod dsl;
pub mod query;
pub mod utils;
pub mod variant;

pub use dsl::{
    EvalContext, EvalError, FunctionHandler, ParseError, Rules, Timestamp, format_function_error,
};
pub use query::{GroupFilterResult, ItemQuery, compute_group_filter, parse_item_query, prepare_property_filter};
pub use variant::Variant;
