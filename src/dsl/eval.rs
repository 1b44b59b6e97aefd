//! Stack machine executing the postfix token sequence of an [`EvalContext`].
//!
//! Failures that depend on values (conversion, domain, division by zero,
//! callback errors) travel on the stack as [`Variant::Error`] until an
//! `and`/`or` absorbs them or evaluation ends. Structural failures abort with
//! an [`EvalError`].

use std::cmp::Ordering;

use super::context::{EvalContext, Timestamp};
use super::error::EvalError;
use super::functions::{Builtin, CallEnv};
use super::lexer::unquote;
use super::token::{Token, TokenClass, TokenKind};
use crate::variant::{Variant, compare_doubles, parse_suffixed};

/// Handler for functions the builtin library does not know.
///
/// Closures with the matching signature implement it, so caller data is
/// simply captured by the closure.
pub trait FunctionHandler {
    fn call(&self, name: &str, args: &[Variant], ts: &Timestamp) -> Result<Variant, String>;
}

impl<F> FunctionHandler for F
where
    F: Fn(&str, &[Variant], &Timestamp) -> Result<Variant, String>,
{
    fn call(&self, name: &str, args: &[Variant], ts: &Timestamp) -> Result<Variant, String> {
        self(name, args, ts)
    }
}

impl EvalContext {
    /// Evaluate with builtin functions only.
    pub fn execute(&self, ts: &Timestamp) -> Result<Variant, EvalError> {
        self.execute_with_callbacks(ts, None, None)
    }

    /// Evaluate, sending unknown functions to `common` and history functions
    /// (those whose first argument is an item query) to `history`.
    pub fn execute_with_callbacks(
        &self,
        ts: &Timestamp,
        common: Option<&dyn FunctionHandler>,
        history: Option<&dyn FunctionHandler>,
    ) -> Result<Variant, EvalError> {
        let executor = Executor {
            ctx: self,
            ts,
            common,
            history,
            stack: Vec::with_capacity(self.tokens().len()),
        };
        executor.run().map_err(|err| {
            tracing::debug!("evaluation of \"{}\" failed: {}", self.source(), err);
            err.finalize()
        })
    }
}

struct Executor<'a> {
    ctx: &'a EvalContext,
    ts: &'a Timestamp,
    common: Option<&'a dyn FunctionHandler>,
    history: Option<&'a dyn FunctionHandler>,
    stack: Vec<Variant>,
}

fn bool_value(value: bool) -> Variant {
    Variant::Double(if value { 1.0 } else { 0.0 })
}

fn is_zero(value: f64) -> bool {
    compare_doubles(value, 0.0) == Ordering::Equal
}

impl<'a> Executor<'a> {
    fn rest(&self, token: &Token) -> &'a str {
        self.ctx.source().get(token.loc.start..).unwrap_or("")
    }

    fn error_at(&self, what: &str, token: &Token) -> Variant {
        Variant::Error(format!("{} at \"{}\"", what, self.rest(token)))
    }

    fn run(mut self) -> Result<Variant, EvalError> {
        let ctx = self.ctx;
        for token in ctx.tokens() {
            let class = token.class();
            if class.contains(TokenClass::OPERATOR1) {
                self.unary(token)?;
            } else if class.contains(TokenClass::OPERATOR2) {
                self.binary(token)?;
            } else if class.contains(TokenClass::FUNCTION) {
                self.function(token)?;
            } else if class.contains(TokenClass::OPERAND) {
                let value = self.operand(token)?;
                self.stack.push(value);
            } else if class.contains(TokenClass::PROPERTY) {
                return Err(EvalError::new(format!(
                    "property filter was not prepared at \"{}\"",
                    self.rest(token)
                )));
            } else if class.contains(TokenClass::EXCEPTION) {
                return Err(self.exception());
            } else {
                return Err(EvalError::new(format!(
                    "unknown token at \"{}\"",
                    self.rest(token)
                )));
            }
        }

        if self.stack.len() != 1 {
            return Err(EvalError::new(format!(
                "stack contains {} values, expected 1",
                self.stack.len()
            )));
        }
        match self.stack.pop() {
            Some(Variant::Error(message)) => Err(EvalError::new(message)),
            Some(value) => Ok(value),
            None => Err(EvalError::new("stack contains 0 values, expected 1")),
        }
    }

    fn operand(&self, token: &Token) -> Result<Variant, EvalError> {
        let text = self.ctx.token_text(token);
        if !token.value.is_none() {
            return Ok(match token.kind {
                TokenKind::Number | TokenKind::UserMacro => token.value.numeric_or_self(),
                _ => token.value.clone(),
            });
        }

        let value = match token.kind {
            TokenKind::Number => {
                if let Ok(value) = text.parse::<u64>() {
                    Variant::UInt64(value)
                } else if let Some(value) = parse_suffixed(text) {
                    Variant::Double(value)
                } else {
                    self.error_at("invalid numeric value", token)
                }
            }
            TokenKind::Str => Variant::Str(unquote(text)),
            TokenKind::ArgNull => Variant::None,
            TokenKind::FunctionId => {
                return Err(EvalError::new(format!(
                    "trigger history functions must be pre-calculated at \"{}\"",
                    self.rest(token)
                )));
            }
            _ => Variant::Str(text.to_string()),
        };
        Ok(value)
    }

    fn unary(&mut self, token: &Token) -> Result<(), EvalError> {
        let Some(operand) = self.stack.pop() else {
            return Err(EvalError::new(format!(
                "unary operator requires one operand at \"{}\"",
                self.rest(token)
            )));
        };
        if operand.is_error() {
            self.stack.push(operand);
            return Ok(());
        }

        let result = match operand.to_double() {
            None => self.error_at(
                &format!(
                    "unary operator operand \"{}\" is not a numeric value",
                    operand.value_desc()
                ),
                token,
            ),
            Some(x) if token.kind == TokenKind::OpNot => bool_value(is_zero(x)),
            Some(x) => Variant::Double(-x),
        };
        self.stack.push(result);
        Ok(())
    }

    fn binary(&mut self, token: &Token) -> Result<(), EvalError> {
        let (Some(right), Some(left)) = (self.stack.pop(), self.stack.pop()) else {
            return Err(EvalError::new(format!(
                "binary operator requires two operands at \"{}\"",
                self.rest(token)
            )));
        };
        let result = self.apply_binary(token, left, right);
        self.stack.push(result);
        Ok(())
    }

    fn apply_binary(&self, token: &Token, left: Variant, right: Variant) -> Variant {
        let logical = matches!(token.kind, TokenKind::OpAnd | TokenKind::OpOr);

        if left.is_error() || right.is_error() {
            let (error, other) = if left.is_error() {
                (left, right)
            } else {
                (right, left)
            };
            if logical {
                if let Some(decided) = self.short_circuit(token.kind, &other) {
                    return decided;
                }
            }
            return error;
        }

        if matches!(token.kind, TokenKind::OpEq | TokenKind::OpNe) {
            if matches!(left, Variant::DoubleVector(_)) || matches!(right, Variant::DoubleVector(_)) {
                return self.error_at("vector cannot be used with comparison operator", token);
            }
            let equal = left.numeric_or_self().compare(&right.numeric_or_self()) == Ordering::Equal;
            return bool_value(equal == (token.kind == TokenKind::OpEq));
        }

        let Some(a) = left.to_double() else {
            return self.error_at(
                &format!(
                    "left operand \"{}\" is not a numeric value for operator",
                    left.value_desc()
                ),
                token,
            );
        };
        let Some(b) = right.to_double() else {
            return self.error_at(
                &format!(
                    "right operand \"{}\" is not a numeric value for operator",
                    right.value_desc()
                ),
                token,
            );
        };

        let value = match token.kind {
            TokenKind::OpAnd => return bool_value(!is_zero(a) && !is_zero(b)),
            TokenKind::OpOr => return bool_value(!is_zero(a) || !is_zero(b)),
            TokenKind::OpLt => return bool_value(compare_doubles(a, b) == Ordering::Less),
            TokenKind::OpLe => return bool_value(compare_doubles(a, b) != Ordering::Greater),
            TokenKind::OpGt => return bool_value(compare_doubles(a, b) == Ordering::Greater),
            TokenKind::OpGe => return bool_value(compare_doubles(a, b) != Ordering::Less),
            TokenKind::OpAdd => a + b,
            TokenKind::OpSub => a - b,
            TokenKind::OpMul => a * b,
            TokenKind::OpDiv => {
                if is_zero(b) {
                    return self.error_at("division by zero", token);
                }
                a / b
            }
            _ => return self.error_at("unknown operator", token),
        };

        if value.is_finite() {
            Variant::Double(value)
        } else {
            self.error_at("calculation resulted in NaN or Infinity", token)
        }
    }

    /// Result of `and`/`or` when the non-error operand alone decides it.
    fn short_circuit(&self, kind: TokenKind, other: &Variant) -> Option<Variant> {
        let value = other.to_double()?;
        match kind {
            TokenKind::OpAnd if is_zero(value) => Some(bool_value(false)),
            TokenKind::OpOr if !is_zero(value) => Some(bool_value(true)),
            _ => None,
        }
    }

    fn function(&mut self, token: &Token) -> Result<(), EvalError> {
        let argc = token.opt as usize;
        if argc > self.stack.len() {
            return Err(EvalError::new(format!(
                "not enough arguments for function at \"{}\"",
                self.rest(token)
            )));
        }
        let args = self.stack.split_off(self.stack.len() - argc);
        let ctx = self.ctx;
        let name = ctx.token_text(token);

        let handler = if token.kind == TokenKind::HistFunction {
            self.history
        } else {
            if let Some(builtin) = Builtin::lookup(name) {
                let env = CallEnv {
                    ts: self.ts,
                    utc_offset: ctx.utc_offset(),
                };
                let result = match builtin.call(&args, &env) {
                    Ok(value) => value,
                    Err(message) => self.error_at(&message, token),
                };
                self.stack.push(result);
                return Ok(());
            }
            self.common
        };

        let Some(handler) = handler else {
            return Err(EvalError::new(format!(
                "Unknown function at \"{}\".",
                self.rest(token)
            )));
        };

        tracing::trace!("dispatching {}() with {} arguments to callback", name, argc);
        let result = match handler.call(name, &args, self.ts) {
            Ok(value) => value,
            Err(message) => Variant::Error(format!("{} at \"{}\".", message, self.rest(token))),
        };
        self.stack.push(result);
        Ok(())
    }

    fn exception(&mut self) -> EvalError {
        let Some(value) = self.stack.pop() else {
            return EvalError::new("exception must have one argument");
        };
        tracing::trace!("expression raised an exception");
        match value {
            Variant::Error(message) => EvalError::new(message),
            other => match other.to_text() {
                Some(text) => EvalError::new(text),
                None => EvalError::new(format!("unknown exception of type '{}'", other.type_name())),
            },
        }
    }
}
