//! Error types returned by parsing and execution.

use thiserror::Error;

/// Lexical or syntactic failure. `offset` is the byte position of the
/// offending fragment in the source expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        ParseError {
            message: message.into(),
            offset,
        }
    }

    /// Build an error quoting the source from `offset` onwards.
    pub fn at(source: &str, offset: usize, what: &str) -> Self {
        let rest = source.get(offset..).unwrap_or("");
        ParseError::new(format!("{} at \"{}\"", what, rest), offset)
    }
}

/// Structural evaluation failure, or an error value that reached the end of
/// evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        EvalError {
            message: message.into(),
        }
    }

    /// Messages starting with a lowercase letter get a generic prefix so
    /// they read as sentences when shown to users.
    pub(crate) fn finalize(self) -> Self {
        if self
            .message
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase())
        {
            EvalError::new(format!("Cannot evaluate expression: {}", self.message))
        } else {
            self
        }
    }
}

/// Message for a history function that failed to evaluate, e.g.
/// `Cannot evaluate function last(/web01/agent.ping,#2): no data.`
/// A missing host or key renders as `?`.
pub fn format_function_error(
    function: &str,
    host: Option<&str>,
    key: Option<&str>,
    parameter: Option<&str>,
    error: Option<&str>,
) -> String {
    let mut msg = format!(
        "Cannot evaluate function {}(/{}/{}",
        function,
        host.unwrap_or("?"),
        key.unwrap_or("?")
    );
    if let Some(parameter) = parameter.filter(|p| !p.is_empty()) {
        msg.push(',');
        msg.push_str(parameter);
    }
    msg.push(')');
    if let Some(error) = error.filter(|e| !e.is_empty()) {
        msg.push_str(": ");
        msg.push_str(error);
    }
    msg.push('.');
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_quotes_rest() {
        let err = ParseError::at("1 + ?", 4, "invalid token");
        assert_eq!(err.to_string(), "invalid token at \"?\"");
        assert_eq!(err.offset, 4);
    }

    #[test]
    fn test_finalize_prefix() {
        let err = EvalError::new("division by zero").finalize();
        assert_eq!(err.message, "Cannot evaluate expression: division by zero");
        let err = EvalError::new("Unknown function").finalize();
        assert_eq!(err.message, "Unknown function");
    }

    #[test]
    fn test_format_function_error() {
        assert_eq!(
            format_function_error("last", Some("web01"), Some("agent.ping"), Some("#2"), Some("no data")),
            "Cannot evaluate function last(/web01/agent.ping,#2): no data."
        );
        assert_eq!(
            format_function_error("avg", None, None, Some(""), None),
            "Cannot evaluate function avg(/?/?)."
        );
    }
}
