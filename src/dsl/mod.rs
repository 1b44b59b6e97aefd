//! Expression language of the monitoring engine.
//!
//! Pipeline: [`lexer`] classifies lexemes under a [`Rules`] mask, the parser
//! turns them into a postfix sequence held by an [`EvalContext`], and the
//! executor in [`eval`] reduces that sequence to one [`Variant`].
//!
//! ```text
//! 1 + 2 * 3            ->  1 2 3 * +
//! max(1, 2) > {$LIM}   ->  1 2 max {$LIM} >
//! last(/h/k, 5m) = 0   ->  /h/k 5m last 0 =
//! ```
//!
//! [`Variant`]: crate::variant::Variant

mod compose;
mod context;
mod error;
pub mod eval;
mod functions;
pub mod lexer;
mod parser;
mod rules;
mod token;

pub use context::{EvalContext, Timestamp};
pub use error::{EvalError, ParseError, format_function_error};
pub use eval::FunctionHandler;
pub use lexer::{Lexer, tokenize};
pub use rules::Rules;
pub use token::{Span, Token, TokenClass, TokenKind};
