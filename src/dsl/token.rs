//! Token types shared by the tokenizer, parser and executor.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::variant::Variant;

/// Byte range of a token inside the source expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

bitflags::bitflags! {
    /// Coarse token classes used by the parser's adjacency checks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TokenClass: u32 {
        const OPERAND = 1 << 0;
        const OPERATOR1 = 1 << 1;
        const OPERATOR2 = 1 << 2;
        const FUNCTION = 1 << 3;
        const PROPERTY = 1 << 4;
        const SEPARATOR = 1 << 5;
        const GROUP_OPEN = 1 << 6;
        const GROUP_CLOSE = 1 << 7;
        const EXCEPTION = 1 << 8;

        /// Classes after which a value is complete.
        const VALUE_END = Self::OPERAND.bits() | Self::PROPERTY.bits() | Self::GROUP_CLOSE.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    // Operators
    OpAdd,   // +
    OpSub,   // -
    OpMul,   // *
    OpDiv,   // /
    OpMinus, // unary -
    OpNot,   // not
    OpEq,    // =
    OpNe,    // <>
    OpLt,    // <
    OpLe,    // <=
    OpGt,    // >
    OpGe,    // >=
    OpAnd,   // and
    OpOr,    // or

    // Punctuation
    GroupOpen,
    GroupClose,
    Comma,

    // Operands
    Number,
    Str,
    Macro,
    UserMacro,
    LldMacro,
    FunctionId,
    ArgQuery,
    ArgPeriod,
    ArgNull,

    // Calls
    Function,
    HistFunction,

    // Filter properties
    PropTag,
    PropGroup,

    Exception,
}

impl TokenKind {
    pub fn class(self) -> TokenClass {
        use TokenKind::*;
        match self {
            OpMinus | OpNot => TokenClass::OPERATOR1,
            OpAdd | OpSub | OpMul | OpDiv | OpEq | OpNe | OpLt | OpLe | OpGt | OpGe | OpAnd
            | OpOr => TokenClass::OPERATOR2,
            GroupOpen => TokenClass::GROUP_OPEN,
            GroupClose => TokenClass::GROUP_CLOSE,
            Comma => TokenClass::SEPARATOR,
            Number | Str | Macro | UserMacro | LldMacro | FunctionId | ArgQuery | ArgPeriod
            | ArgNull => TokenClass::OPERAND,
            Function | HistFunction => TokenClass::FUNCTION,
            PropTag | PropGroup => TokenClass::PROPERTY,
            Exception => TokenClass::EXCEPTION,
        }
    }

    /// Binding strength of an operator; lower binds tighter.
    pub fn priority(self) -> u8 {
        use TokenKind::*;
        match self {
            OpMinus => 1,
            OpNot => 2,
            OpMul | OpDiv => 3,
            OpAdd | OpSub => 4,
            OpLt | OpLe | OpGt | OpGe => 5,
            OpEq | OpNe => 6,
            OpAnd => 7,
            OpOr => 8,
            _ => u8::MAX,
        }
    }

    pub fn is_operator(self) -> bool {
        self.class()
            .intersects(TokenClass::OPERATOR1 | TokenClass::OPERATOR2)
    }

    /// Operator text as written in expressions.
    pub fn symbol(self) -> Option<&'static str> {
        use TokenKind::*;
        let text = match self {
            OpAdd => "+",
            OpSub | OpMinus => "-",
            OpMul => "*",
            OpDiv => "/",
            OpNot => "not",
            OpEq => "=",
            OpNe => "<>",
            OpLt => "<",
            OpLe => "<=",
            OpGt => ">",
            OpGe => ">=",
            OpAnd => "and",
            OpOr => "or",
            _ => return None,
        };
        Some(text)
    }

    /// Tokens that may stand as the value side of a property comparison.
    pub fn is_filter_value(self) -> bool {
        matches!(
            self,
            TokenKind::Str | TokenKind::UserMacro | TokenKind::Macro | TokenKind::LldMacro
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.symbol() {
            Some(symbol) => f.write_str(symbol),
            None => write!(f, "{:?}", self),
        }
    }
}

/// One element of the postfix sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: Span,
    #[serde(default, skip_serializing_if = "Variant::is_none")]
    pub value: Variant,
    /// Argument count for calls, constant index for constants, reference
    /// index for function ids.
    pub opt: u32,
}

impl Token {
    pub fn new(kind: TokenKind, loc: Span) -> Self {
        Token {
            kind,
            loc,
            value: Variant::None,
            opt: 0,
        }
    }

    pub fn class(&self) -> TokenClass {
        self.kind.class()
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.loc.start..self.loc.end).unwrap_or("")
    }

    /// Net number of values this token leaves on the stack.
    pub fn stack_effect(&self) -> i64 {
        match self.class() {
            c if c.intersects(TokenClass::OPERAND | TokenClass::PROPERTY) => 1,
            c if c.contains(TokenClass::OPERATOR1) => 0,
            c if c.contains(TokenClass::OPERATOR2) => -1,
            c if c.contains(TokenClass::FUNCTION) => 1 - self.opt as i64,
            c if c.contains(TokenClass::EXCEPTION) => -1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priorities_follow_binding_order() {
        let order = [
            TokenKind::OpMinus,
            TokenKind::OpNot,
            TokenKind::OpMul,
            TokenKind::OpAdd,
            TokenKind::OpLt,
            TokenKind::OpEq,
            TokenKind::OpAnd,
            TokenKind::OpOr,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].priority() < pair[1].priority());
        }
    }

    #[test]
    fn test_stack_effect() {
        let mut call = Token::new(TokenKind::Function, Span::new(0, 3));
        call.opt = 3;
        assert_eq!(call.stack_effect(), -2);
        assert_eq!(Token::new(TokenKind::OpMul, Span::new(0, 1)).stack_effect(), -1);
        assert_eq!(Token::new(TokenKind::ArgNull, Span::new(0, 0)).stack_effect(), 1);
    }

    #[test]
    fn test_display_uses_symbols() {
        assert_eq!(TokenKind::OpNe.to_string(), "<>");
        assert_eq!(TokenKind::Function.to_string(), "Function");
    }
}
