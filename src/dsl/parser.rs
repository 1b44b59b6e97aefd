//! Operator precedence parser producing the postfix token sequence.
//!
//! Precedence, tightest first:
//!
//! unary `-`
//! `not`
//! `*` `/`
//! `+` `-`
//! `<` `<=` `>` `>=`
//! `=` `<>`
//! `and`
//! `or`

use super::error::ParseError;
use super::lexer::Lexer;
use super::rules::Rules;
use super::token::{Span, Token, TokenClass, TokenKind};

/// Entry of the operator stack.
struct Pending {
    token: Token,
    /// Output length when a call was opened.
    out_start: usize,
    /// Group opened by a function call rather than for grouping.
    call: bool,
}

/// Parser state. Lives only for the duration of one parse.
struct Parser<'a> {
    source: &'a str,
    rules: Rules,
    lexer: Lexer<'a>,
    output: Vec<Token>,
    ops: Vec<Pending>,
    last: Option<TokenKind>,
    const_index: u32,
    functionid_index: u32,
}

/// Result of a successful parse.
pub(crate) struct Parsed {
    pub tokens: Vec<Token>,
    pub constants: u32,
    pub functionids: u32,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, rules: Rules) -> Self {
        Parser {
            source,
            rules,
            lexer: Lexer::new(source, rules),
            output: Vec::new(),
            ops: Vec::new(),
            last: None,
            const_index: 0,
            functionid_index: 0,
        }
    }

    fn error(&self, offset: usize, what: &str) -> ParseError {
        ParseError::at(self.source, offset, what)
    }

    fn last_class(&self) -> TokenClass {
        self.last.map_or(TokenClass::empty(), TokenKind::class)
    }

    fn after_value(&self) -> bool {
        self.last_class().intersects(TokenClass::VALUE_END)
    }

    /// True when the innermost open group belongs to a function call.
    fn in_call_group(&self) -> bool {
        self.ops
            .iter()
            .rev()
            .find(|p| p.token.kind == TokenKind::GroupOpen)
            .is_some_and(|p| p.call)
    }

    fn run(mut self) -> Result<Parsed, ParseError> {
        while let Some(token) = self.lexer.next_token()? {
            let kind = token.kind;
            let class = token.class();
            if class.intersects(TokenClass::OPERAND | TokenClass::PROPERTY) {
                self.push_operand(token)?;
            } else if class.contains(TokenClass::FUNCTION) {
                self.push_function(token)?;
            } else if class.contains(TokenClass::OPERATOR1) {
                self.push_unary(token)?;
            } else if class.contains(TokenClass::OPERATOR2) {
                self.push_binary(token)?;
            } else if class.contains(TokenClass::GROUP_OPEN) {
                self.open_group(token)?;
            } else if class.contains(TokenClass::GROUP_CLOSE) {
                self.close_group(token)?;
            } else if class.contains(TokenClass::SEPARATOR) {
                self.separate(token)?;
            } else {
                return Err(self.error(token.loc.start, "unexpected token"));
            }
            self.last = Some(kind);
        }
        self.finish()
    }

    fn push_operand(&mut self, mut token: Token) -> Result<(), ParseError> {
        if self.after_value() {
            return Err(self.error(token.loc.start, "missing operator"));
        }
        if self.last.is_some_and(|k| k.class() == TokenClass::FUNCTION) {
            return Err(self.error(token.loc.start, "missing '(' after function name"));
        }

        match token.kind {
            TokenKind::FunctionId => {
                token.opt = self.functionid_index;
                self.functionid_index += 1;
            }
            TokenKind::Number
            | TokenKind::Str
            | TokenKind::Macro
            | TokenKind::UserMacro
            | TokenKind::LldMacro
                if self.rules.contains(Rules::CONST_INDEX) =>
            {
                token.opt = self.const_index;
                self.const_index += 1;
            }
            _ => {}
        }
        self.output.push(token);
        Ok(())
    }

    fn push_function(&mut self, token: Token) -> Result<(), ParseError> {
        if self.after_value() {
            return Err(self.error(token.loc.start, "missing operator"));
        }
        let out_start = self.output.len();
        self.ops.push(Pending {
            token,
            out_start,
            call: false,
        });
        Ok(())
    }

    fn push_unary(&mut self, token: Token) -> Result<(), ParseError> {
        if self.after_value() {
            return Err(self.error(token.loc.start, "unexpected unary operator"));
        }
        self.ops.push(Pending {
            token,
            out_start: 0,
            call: false,
        });
        Ok(())
    }

    fn push_binary(&mut self, token: Token) -> Result<(), ParseError> {
        if !self.after_value() {
            return Err(self.error(token.loc.start, "missing operand"));
        }
        let priority = token.kind.priority();
        while let Some(top) = self.ops.last() {
            if !top.token.kind.is_operator() || top.token.kind.priority() > priority {
                break;
            }
            if let Some(pending) = self.ops.pop() {
                self.output.push(pending.token);
            }
        }
        self.ops.push(Pending {
            token,
            out_start: 0,
            call: false,
        });
        Ok(())
    }

    fn open_group(&mut self, token: Token) -> Result<(), ParseError> {
        let call = self.last_class() == TokenClass::FUNCTION;
        if !call {
            if self.after_value() {
                return Err(self.error(token.loc.start, "missing operator"));
            }
            if !self.rules.contains(Rules::GROUP) {
                return Err(self.error(token.loc.start, "groups are not allowed"));
            }
        }
        self.ops.push(Pending {
            token,
            out_start: self.output.len(),
            call,
        });
        Ok(())
    }

    /// Move operators to the output until the innermost open group.
    fn drain_to_group(&mut self, offset: usize) -> Result<(), ParseError> {
        loop {
            match self.ops.last() {
                Some(top) if top.token.kind == TokenKind::GroupOpen => return Ok(()),
                Some(_) => {
                    if let Some(pending) = self.ops.pop() {
                        self.output.push(pending.token);
                    }
                }
                None => return Err(self.error(offset, "unmatched closing parenthesis")),
            }
        }
    }

    fn null_arg(&mut self, offset: usize) {
        self.output
            .push(Token::new(TokenKind::ArgNull, Span::new(offset, offset)));
    }

    fn separate(&mut self, token: Token) -> Result<(), ParseError> {
        let offset = token.loc.start;
        if !self.in_call_group() {
            return Err(self.error(offset, "unexpected comma"));
        }
        if !self.after_value() {
            // `f(,x)` and `f(a,,b)` leave an empty argument
            let empty_arg = self.last == Some(TokenKind::Comma)
                || (self.last == Some(TokenKind::GroupOpen) && self.last_group_is_call());
            if !empty_arg {
                return Err(self.error(offset, "unexpected comma"));
            }
            self.null_arg(offset);
        }
        self.drain_to_group(offset)
    }

    fn last_group_is_call(&self) -> bool {
        self.ops
            .last()
            .is_some_and(|p| p.token.kind == TokenKind::GroupOpen && p.call)
    }

    fn close_group(&mut self, token: Token) -> Result<(), ParseError> {
        let offset = token.loc.start;
        let empty_call = self.last == Some(TokenKind::GroupOpen) && self.last_group_is_call();
        if !self.after_value() && !empty_call {
            let what = if self.last == Some(TokenKind::Comma) {
                "trailing comma"
            } else {
                "unexpected closing parenthesis"
            };
            return Err(self.error(offset, what));
        }

        self.drain_to_group(offset)?;
        let Some(group) = self.ops.pop() else {
            return Err(self.error(offset, "unmatched closing parenthesis"));
        };
        if !group.call {
            return Ok(());
        }

        let Some(mut call) = self.ops.pop() else {
            return Err(self.error(offset, "unmatched closing parenthesis"));
        };
        let arity = self.output[call.out_start..]
            .iter()
            .map(Token::stack_effect)
            .sum::<i64>();
        call.token.opt = u32::try_from(arity).map_err(|_| {
            self.error(call.token.loc.start, "invalid function argument list")
        })?;
        if self
            .output
            .get(call.out_start)
            .is_some_and(|t| t.kind == TokenKind::ArgQuery)
        {
            call.token.kind = TokenKind::HistFunction;
        }
        self.output.push(call.token);
        Ok(())
    }

    fn finish(mut self) -> Result<Parsed, ParseError> {
        let end = self.source.len();
        match self.last {
            None => return Err(ParseError::new("empty expression", 0)),
            Some(_) if !self.after_value() => {
                return Err(self.error(end, "unexpected end of expression"));
            }
            _ => {}
        }

        while let Some(pending) = self.ops.pop() {
            if pending.token.kind == TokenKind::GroupOpen {
                return Err(self.error(pending.token.loc.start, "missing closing parenthesis"));
            }
            self.output.push(pending.token);
        }

        validate_properties(self.source, &self.output)?;

        tracing::debug!(
            "Parsed expression into {} tokens (rules: {:#x})",
            self.output.len(),
            self.rules.bits()
        );

        Ok(Parsed {
            tokens: self.output,
            constants: self.const_index,
            functionids: self.functionid_index,
        })
    }
}

/// A property may only appear as `prop = value` / `prop <> value` (either
/// operand order) against a single string or macro.
fn validate_properties(source: &str, tokens: &[Token]) -> Result<(), ParseError> {
    let is_cmp = |t: Option<&Token>| t.is_some_and(|t| matches!(t.kind, TokenKind::OpEq | TokenKind::OpNe));
    let is_value = |t: Option<&Token>| t.is_some_and(|t| t.kind.is_filter_value());

    for (i, token) in tokens.iter().enumerate() {
        if token.class() != TokenClass::PROPERTY {
            continue;
        }
        let value_after = is_value(tokens.get(i + 1)) && is_cmp(tokens.get(i + 2));
        let value_before = i > 0 && is_value(tokens.get(i - 1)) && is_cmp(tokens.get(i + 1));
        if !value_after && !value_before {
            return Err(ParseError::at(
                source,
                token.loc.start,
                "property must be compared with a value",
            ));
        }
    }
    Ok(())
}

/// Parse `source` into a postfix token sequence.
pub(crate) fn parse(source: &str, rules: Rules) -> Result<Parsed, ParseError> {
    Parser::new(source, rules).run()
}
