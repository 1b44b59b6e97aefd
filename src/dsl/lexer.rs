//! Tokenizer for monitoring expressions.
//!
//! The lexer produces one token at a time. Whether `-` is unary and whether
//! `/` starts an item query depends on the previously produced token, so the
//! lexer keeps the last two token kinds.

use winnow::ascii::{digit0, digit1, multispace0};
use winnow::combinator::{alt, opt};
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

use super::error::ParseError;
use super::rules::Rules;
use super::token::{Span, Token, TokenClass, TokenKind};
use crate::query::scan_item_query;
use crate::variant::suffix_factor;

// Manually define PResult for resilience against winnow version changes
type PResult<T> = Result<T, winnow::error::ErrMode<winnow::error::ContextError>>;

/// Lex a decimal number with optional fraction and exponent, without suffix.
fn lex_number<'s>(input: &mut &'s str) -> PResult<&'s str> {
    (
        alt(((digit1, opt(('.', digit0))).void(), ('.', digit1).void())),
        opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1)),
    )
        .take()
        .parse_next(input)
}

/// Lex an identifier: keyword, function name or property.
fn lex_ident<'s>(input: &mut &'s str) -> PResult<&'s str> {
    (
        take_while(1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

/// Lex a macro name such as `HOST.HOST` or `CPU_LOAD`.
fn lex_macro_name<'s>(input: &mut &'s str) -> PResult<&'s str> {
    take_while(1.., |c: char| {
        c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '.'
    })
    .parse_next(input)
}

/// Lex operators and punctuation.
fn lex_operator(input: &mut &str) -> PResult<TokenKind> {
    alt((
        // Multi-char operators first
        "<>".value(TokenKind::OpNe),
        "<=".value(TokenKind::OpLe),
        ">=".value(TokenKind::OpGe),
        // Single-char operators
        "<".value(TokenKind::OpLt),
        ">".value(TokenKind::OpGt),
        "=".value(TokenKind::OpEq),
        "+".value(TokenKind::OpAdd),
        "-".value(TokenKind::OpSub),
        "*".value(TokenKind::OpMul),
        "/".value(TokenKind::OpDiv),
        // Punctuation
        "(".value(TokenKind::GroupOpen),
        ")".value(TokenKind::GroupClose),
        ",".value(TokenKind::Comma),
    ))
    .parse_next(input)
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Length of a `"..."` literal at the start of `text`, validating escapes.
pub(crate) fn scan_string(text: &str) -> Result<usize, &'static str> {
    let mut chars = text.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok(i + 1),
            '\\' => match chars.next() {
                Some((_, '"' | '\\')) => {}
                Some(_) => return Err("invalid escape sequence in string"),
                None => return Err("unterminated string"),
            },
            _ => {}
        }
    }
    Err("unterminated string")
}

/// Length of a balanced `{...}` fragment, honoring quoted strings.
pub(crate) fn scan_braces(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if quoted {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => quoted = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => quoted = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Body of a `"..."` literal with escapes removed.
pub(crate) fn unquote(text: &str) -> String {
    let body = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text);
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Kind of a single macro fragment judged by its opening characters.
fn macro_kind(fragment: &str) -> TokenKind {
    if fragment.starts_with("{$") {
        TokenKind::UserMacro
    } else if fragment.starts_with("{#") || fragment.starts_with("{{#") {
        TokenKind::LldMacro
    } else {
        TokenKind::Macro
    }
}

/// Split the text of a compound constant into macro fragments (with their
/// kind) and literal runs (without).
pub(crate) fn scan_macro_fragments(text: &str) -> impl Iterator<Item = (&str, Option<TokenKind>)> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let len = if rest.starts_with('{') {
            scan_braces(rest).unwrap_or(rest.len())
        } else {
            rest.find('{').unwrap_or(rest.len())
        };
        let (fragment, tail) = rest.split_at(len);
        rest = tail;
        let kind = fragment.starts_with('{').then(|| macro_kind(fragment));
        Some((fragment, kind))
    })
}

/// Streaming tokenizer over one expression.
pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    rules: Rules,
    prev: Option<TokenKind>,
    before_prev: Option<TokenKind>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, rules: Rules) -> Self {
        Lexer {
            source,
            pos: 0,
            rules,
            prev: None,
            before_prev: None,
        }
    }

    /// Produce the next token, or `None` at the end of input.
    pub fn next_token(&mut self) -> Result<Option<Token>, ParseError> {
        let mut rest = &self.source[self.pos..];
        let _: PResult<&str> = multispace0.parse_next(&mut rest);
        let start = self.source.len() - rest.len();
        if rest.is_empty() {
            self.pos = start;
            return Ok(None);
        }

        let token = self.lex_at(start)?;
        self.pos = token.loc.end;
        self.before_prev = self.prev;
        self.prev = Some(token.kind);
        Ok(Some(token))
    }

    fn error(&self, offset: usize, what: &str) -> ParseError {
        ParseError::at(self.source, offset, what)
    }

    fn follows_value(&self) -> bool {
        self.prev
            .is_some_and(|kind| kind.class().intersects(TokenClass::VALUE_END))
    }

    fn lex_at(&self, start: usize) -> Result<Token, ParseError> {
        let rest = &self.source[start..];

        if self.prev == Some(TokenKind::Comma) && self.before_prev == Some(TokenKind::ArgQuery) {
            if let Some(token) = self.lex_period(start) {
                return Ok(token);
            }
        }

        let Some(c) = rest.chars().next() else {
            return Err(self.error(start, "unexpected end of expression"));
        };

        match c {
            '"' => self.lex_string(start),
            '{' => self.lex_macro_or_compound(start),
            '0'..='9' | '.' => self.lex_numeric(start),
            '/' if self.rules.contains(Rules::QUERY) && !self.follows_value() => {
                self.lex_query(start)
            }
            c if c.is_ascii_alphabetic() || c == '_' => self.lex_word(start),
            _ => self.lex_punct(start),
        }
    }

    fn lex_period(&self, start: usize) -> Option<Token> {
        let rest = &self.source[start..];
        let len = rest.find([',', ')']).unwrap_or(rest.len());
        let text = rest[..len].trim_end();
        if text.is_empty() {
            return None;
        }
        Some(Token::new(
            TokenKind::ArgPeriod,
            Span::new(start, start + text.len()),
        ))
    }

    fn lex_string(&self, start: usize) -> Result<Token, ParseError> {
        if !self.rules.contains(Rules::VAR_STR) {
            return Err(self.error(start, "string constants are not allowed"));
        }
        let len = scan_string(&self.source[start..]).map_err(|what| self.error(start, what))?;
        Ok(Token::new(TokenKind::Str, Span::new(start, start + len)))
    }

    fn lex_query(&self, start: usize) -> Result<Token, ParseError> {
        match scan_item_query(&self.source[start..]) {
            Some(len) => Ok(Token::new(TokenKind::ArgQuery, Span::new(start, start + len))),
            None => Err(self.error(start, "invalid item query")),
        }
    }

    /// Lex a single macro fragment starting at `start` (which holds `{`).
    fn lex_macro(&self, start: usize) -> Result<Token, ParseError> {
        let rest = &self.source[start..];
        let invalid = || self.error(start, "invalid macro");

        let (kind, len, rule) = if let Some(body) = rest.strip_prefix("{$") {
            let mut input = body;
            lex_macro_name(&mut input).map_err(|_| invalid())?;
            let mut len = 2 + body.len() - input.len();
            if input.starts_with(':') {
                let context = &input[1..];
                let context_len = if context.starts_with('"') {
                    scan_string(context).map_err(|what| self.error(start + len + 1, what))?
                } else {
                    context.find('}').ok_or_else(invalid)?
                };
                len += 1 + context_len;
            }
            if !self.source[start + len..].starts_with('}') {
                return Err(invalid());
            }
            (TokenKind::UserMacro, len + 1, Rules::USERMACRO)
        } else if let Some(body) = rest.strip_prefix("{#") {
            let mut input = body;
            lex_macro_name(&mut input).map_err(|_| invalid())?;
            if !input.starts_with('}') {
                return Err(invalid());
            }
            (TokenKind::LldMacro, 2 + body.len() - input.len() + 1, Rules::LLDMACRO)
        } else if rest.starts_with("{{") {
            let len = scan_braces(rest).ok_or_else(invalid)?;
            let inner = scan_braces(&rest[1..]).ok_or_else(invalid)?;
            // nested macros carry a function call: {{ITEM.VALUE}.regsub(...)}
            if !rest[1 + inner..].starts_with('.') {
                return Err(invalid());
            }
            if rest.starts_with("{{#") {
                (TokenKind::LldMacro, len, Rules::LLDMACRO)
            } else {
                (TokenKind::Macro, len, Rules::MACRO)
            }
        } else {
            let body = &rest[1..];
            let digits = body.bytes().take_while(u8::is_ascii_digit).count();
            if digits > 0 && body[digits..].starts_with('}') {
                (TokenKind::FunctionId, digits + 2, Rules::FUNCTIONID)
            } else {
                let mut input = body;
                let name = lex_macro_name(&mut input).map_err(|_| invalid())?;
                if !name.starts_with(|c: char| c.is_ascii_uppercase()) || !input.starts_with('}') {
                    return Err(invalid());
                }
                (TokenKind::Macro, name.len() + 2, Rules::MACRO)
            }
        };

        if !self.rules.contains(rule) {
            return Err(self.error(start, "macros of this type are not allowed"));
        }
        Ok(Token::new(kind, Span::new(start, start + len)))
    }

    fn lex_macro_or_compound(&self, start: usize) -> Result<Token, ParseError> {
        let token = self.lex_macro(start)?;
        if token.kind == TokenKind::FunctionId {
            return Ok(token);
        }
        Ok(self.extend_compound(token))
    }

    fn lex_numeric(&self, start: usize) -> Result<Token, ParseError> {
        let rest = &self.source[start..];
        let mut input = rest;
        if lex_number(&mut input).is_err() {
            return Err(self.error(start, "invalid numeric value"));
        }
        let mut end = start + rest.len() - input.len();

        if let Some(c) = input.chars().next() {
            let next = input[c.len_utf8()..].chars().next();
            if suffix_factor(c).is_some() && !next.is_some_and(is_word_char) {
                end += c.len_utf8();
            }
        }

        if !self.rules.contains(Rules::VAR_NUM) {
            return Err(self.error(start, "numeric constants are not allowed"));
        }

        let token = Token::new(TokenKind::Number, Span::new(start, end));
        let token = self.extend_compound(token);
        if self.source[token.loc.end..]
            .chars()
            .next()
            .is_some_and(|c| is_word_char(c) || c == '.')
        {
            return Err(self.error(start, "invalid numeric value"));
        }
        Ok(token)
    }

    /// Join adjacent macro, digit and `.` fragments into one numeric token.
    /// A single fragment keeps its own kind.
    fn extend_compound(&self, first: Token) -> Token {
        if !self.rules.contains(Rules::COMPOUND_CONST) {
            return first;
        }

        let mut end = first.loc.end;
        let mut fragments = 1;
        loop {
            let rest = &self.source[end..];
            match rest.chars().next() {
                Some(c) if c.is_ascii_digit() || c == '.' => {
                    end += rest
                        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                        .unwrap_or(rest.len());
                }
                Some('{') => match self.lex_macro(end) {
                    Ok(token) if token.kind != TokenKind::FunctionId => end = token.loc.end,
                    _ => break,
                },
                _ => break,
            }
            fragments += 1;
        }

        let rest = &self.source[end..];
        if first.kind != TokenKind::Number || fragments > 1 {
            if let Some(c) = rest.chars().next() {
                let next = rest[c.len_utf8()..].chars().next();
                if suffix_factor(c).is_some() && !next.is_some_and(is_word_char) {
                    end += c.len_utf8();
                    fragments += 1;
                }
            }
        }

        if fragments == 1 {
            return first;
        }
        Token::new(TokenKind::Number, Span::new(first.loc.start, end))
    }

    fn lex_word(&self, start: usize) -> Result<Token, ParseError> {
        let rest = &self.source[start..];
        let mut input = rest;
        let word = lex_ident(&mut input).map_err(|_| self.error(start, "invalid token"))?;
        let end = start + word.len();
        let next = input.chars().next();
        let loc = Span::new(start, end);

        if self.rules.contains(Rules::LOGIC) {
            let kind = match word {
                "and" => Some(TokenKind::OpAnd),
                "or" => Some(TokenKind::OpOr),
                "not" => Some(TokenKind::OpNot),
                _ => None,
            };
            if let Some(kind) = kind {
                if !next.is_some_and(|c| c.is_whitespace() || c == '(') {
                    return Err(self.error(start, "invalid logical operator"));
                }
                return Ok(Token::new(kind, loc));
            }
        }

        if next == Some('(') && self.rules.contains(Rules::FUNCTION) {
            return Ok(Token::new(TokenKind::Function, loc));
        }

        match word {
            "tag" if self.rules.contains(Rules::PROP_TAG) => Ok(Token::new(TokenKind::PropTag, loc)),
            "group" if self.rules.contains(Rules::PROP_GROUP) => {
                Ok(Token::new(TokenKind::PropGroup, loc))
            }
            _ => Err(self.error(start, "invalid token")),
        }
    }

    fn lex_punct(&self, start: usize) -> Result<Token, ParseError> {
        let rest = &self.source[start..];
        let mut input = rest;
        let kind = lex_operator(&mut input).map_err(|_| self.error(start, "invalid token"))?;
        let end = start + rest.len() - input.len();

        let kind = match kind {
            TokenKind::OpSub if !self.follows_value() => TokenKind::OpMinus,
            kind => kind,
        };

        let rule = match kind {
            TokenKind::OpAdd
            | TokenKind::OpSub
            | TokenKind::OpMul
            | TokenKind::OpDiv
            | TokenKind::OpMinus => Rules::MATH,
            TokenKind::OpLt | TokenKind::OpLe | TokenKind::OpGt | TokenKind::OpGe => Rules::COMPARE,
            TokenKind::OpEq | TokenKind::OpNe => Rules::COMPARE_EQ,
            TokenKind::Comma => Rules::FUNCTION,
            _ => Rules::GROUP | Rules::FUNCTION,
        };
        if !self.rules.intersects(rule) {
            return Err(self.error(start, "invalid token"));
        }
        Ok(Token::new(kind, Span::new(start, end)))
    }
}

/// Tokenize the entire input.
pub fn tokenize(source: &str, rules: Rules) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer::new(source, rules);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str, rules: Rules) -> Vec<TokenKind> {
        tokenize(source, rules)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_arithmetic_tokens() {
        assert_eq!(
            kinds("1 + 2*-3", Rules::BASIC_MATH),
            vec![
                TokenKind::Number,
                TokenKind::OpAdd,
                TokenKind::Number,
                TokenKind::OpMul,
                TokenKind::OpMinus,
                TokenKind::Number,
            ]
        );
    }

    #[test]
    fn test_minus_after_group_close_is_binary() {
        assert_eq!(
            kinds("(1)-2", Rules::BASIC_MATH),
            vec![
                TokenKind::GroupOpen,
                TokenKind::Number,
                TokenKind::GroupClose,
                TokenKind::OpSub,
                TokenKind::Number,
            ]
        );
    }

    #[test]
    fn test_number_suffix_and_exponent() {
        let source = "1.5e3 + 10K - 5m";
        let tokens = tokenize(source, Rules::BASIC_MATH).unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text(source)).collect();
        assert_eq!(texts, vec!["1.5e3", "+", "10K", "-", "5m"]);
    }

    #[test]
    fn test_number_followed_by_letters_fails() {
        let err = tokenize("10abc", Rules::BASIC_MATH).unwrap_err();
        assert_eq!(err.offset, 0);
        assert!(err.message.starts_with("invalid numeric value"));
    }

    #[test]
    fn test_comparison_operators() {
        assert_eq!(
            kinds("1<>2 <= 3 >= 4 = 5", Rules::BASIC_MATH),
            vec![
                TokenKind::Number,
                TokenKind::OpNe,
                TokenKind::Number,
                TokenKind::OpLe,
                TokenKind::Number,
                TokenKind::OpGe,
                TokenKind::Number,
                TokenKind::OpEq,
                TokenKind::Number,
            ]
        );
    }

    #[test]
    fn test_logic_keywords_need_separator() {
        assert_eq!(
            kinds("1 and not(0)", Rules::BASIC_MATH),
            vec![
                TokenKind::Number,
                TokenKind::OpAnd,
                TokenKind::OpNot,
                TokenKind::GroupOpen,
                TokenKind::Number,
                TokenKind::GroupClose,
            ]
        );
        assert!(tokenize("1 and\"x\"", Rules::TRIGGER_EXPRESSION).is_err());
    }

    #[test]
    fn test_string_escapes() {
        let source = r#""a \"quoted\" \\ value""#;
        let tokens = tokenize(source, Rules::VAR_STR).unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].loc, Span::new(0, source.len()));

        let err = tokenize(r#""bad \n""#, Rules::VAR_STR).unwrap_err();
        assert!(err.message.starts_with("invalid escape sequence"));
        let err = tokenize(r#""open"#, Rules::VAR_STR).unwrap_err();
        assert!(err.message.starts_with("unterminated string"));
    }

    #[test]
    fn test_macro_families() {
        let rules = Rules::TRIGGER_EXPRESSION | Rules::LLDMACRO;
        assert_eq!(
            kinds(
                r#"{$LIMIT:"ctx"} + {#IFNAME} + {HOST.HOST} + {12} + {{ITEM.VALUE}.regsub("(.*)", \1)}"#,
                rules & !Rules::COMPOUND_CONST
            ),
            vec![
                TokenKind::UserMacro,
                TokenKind::OpAdd,
                TokenKind::LldMacro,
                TokenKind::OpAdd,
                TokenKind::Macro,
                TokenKind::OpAdd,
                TokenKind::FunctionId,
                TokenKind::OpAdd,
                TokenKind::Macro,
            ]
        );
    }

    #[test]
    fn test_macro_rule_gating() {
        assert!(tokenize("{$A}", Rules::BASIC_MATH).is_err());
        assert!(tokenize("{1}", Rules::CALC_EXPRESSION).is_err());
    }

    #[test]
    fn test_compound_constant() {
        let source = "{$A}.{$B}K > 1";
        let tokens = tokenize(source, Rules::TRIGGER_EXPRESSION).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Number);
        assert_eq!(tokens[0].text(source), "{$A}.{$B}K");

        // a lone macro keeps its kind
        let tokens = tokenize("{$A} > 1", Rules::TRIGGER_EXPRESSION).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::UserMacro);
    }

    #[test]
    fn test_function_and_query_tokens() {
        let source = "last(/host/key[a,\"b]\"]?[tag=\"x\"],#3:now-1h) / 2";
        let tokens = tokenize(source, Rules::CALC_EXPRESSION).unwrap();
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Function,
                TokenKind::GroupOpen,
                TokenKind::ArgQuery,
                TokenKind::Comma,
                TokenKind::ArgPeriod,
                TokenKind::GroupClose,
                TokenKind::OpDiv,
                TokenKind::Number,
            ]
        );
        assert_eq!(tokens[0].text(source), "last");
        assert_eq!(tokens[2].text(source), "/host/key[a,\"b]\"]?[tag=\"x\"]");
        assert_eq!(tokens[4].text(source), "#3:now-1h");
    }

    #[test]
    fn test_properties() {
        assert_eq!(
            kinds(r#"group = "Linux" and tag <> "env""#, Rules::QUERY_EXPRESSION),
            vec![
                TokenKind::PropGroup,
                TokenKind::OpEq,
                TokenKind::Str,
                TokenKind::OpAnd,
                TokenKind::PropTag,
                TokenKind::OpNe,
                TokenKind::Str,
            ]
        );
    }

    #[test]
    fn test_macro_fragments() {
        let fragments: Vec<(&str, Option<TokenKind>)> =
            scan_macro_fragments("{$A}.5{#B}K").collect();
        assert_eq!(
            fragments,
            vec![
                ("{$A}", Some(TokenKind::UserMacro)),
                (".5", None),
                ("{#B}", Some(TokenKind::LldMacro)),
                ("K", None),
            ]
        );
    }

    #[test]
    fn test_unknown_character() {
        let err = tokenize("1 + ?", Rules::BASIC_MATH).unwrap_err();
        assert_eq!(err.offset, 4);
        assert_eq!(err.message, "invalid token at \"?\"");
    }
}
