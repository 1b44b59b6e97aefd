//! Parsed expression context and its collaborator hooks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use time::UtcOffset;

use super::error::{EvalError, ParseError};
use super::functions::TIMER_FUNCTIONS;
use super::lexer::scan_macro_fragments;
use super::parser;
use super::rules::Rules;
use super::token::{Span, Token, TokenKind};
use crate::variant::{Variant, parse_suffixed};

/// Evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub sec: i64,
    pub ns: u32,
}

impl Timestamp {
    pub fn from_secs(sec: i64) -> Self {
        Timestamp { sec, ns: 0 }
    }

    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => Timestamp {
                sec: elapsed.as_secs() as i64,
                ns: elapsed.subsec_nanos(),
            },
            Err(_) => Timestamp::default(),
        }
    }
}

/// `Token::opt` of a function id token rewritten by
/// [`EvalContext::replace_functionid`].
const REPLACED_FUNCTIONID: u32 = u32::MAX;

fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or_else(|err| {
        tracing::warn!("Cannot determine local time offset, using UTC: {}", err);
        UtcOffset::UTC
    })
}

fn functionid_of(token: &Token, source: &str) -> Option<u64> {
    let text = token.text(source);
    text.get(1..text.len().saturating_sub(1))?.parse().ok()
}

/// A parsed expression: source text, active rules and the postfix sequence.
///
/// Serializes with serde for caching; the time zone is not stored and is
/// looked up again on deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalContext {
    source: String,
    rules: Rules,
    tokens: Vec<Token>,
    constants: u32,
    functionids: u32,
    #[serde(skip, default = "local_offset")]
    utc_offset: UtcOffset,
}

impl EvalContext {
    /// Parse `source` under `rules`.
    pub fn parse(source: &str, rules: Rules) -> Result<Self, ParseError> {
        let parsed = parser::parse(source, rules)?;
        Ok(EvalContext {
            source: source.to_string(),
            rules,
            tokens: parsed.tokens,
            constants: parsed.constants,
            functionids: parsed.functionids,
            utc_offset: local_offset(),
        })
    }

    /// Context whose evaluation fails with `message`, rendered as
    /// `throw("message")`.
    pub fn with_exception(message: &str) -> Self {
        let quoted = format!(
            "\"{}\"",
            message.replace('\\', "\\\\").replace('"', "\\\"")
        );
        let source = format!("throw({})", quoted);
        let mut text = Token::new(TokenKind::Str, Span::new(6, 6 + quoted.len()));
        text.value = Variant::Str(message.to_string());
        let throw = Token::new(TokenKind::Exception, Span::new(0, 5));
        EvalContext {
            source,
            rules: Rules::VAR_STR,
            tokens: vec![text, throw],
            constants: 0,
            functionids: 0,
            utc_offset: UtcOffset::UTC,
        }
    }

    /// Time zone used by `date`, `time`, `dayofweek` and `dayofmonth`.
    pub fn with_utc_offset(mut self, offset: UtcOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn rules(&self) -> Rules {
        self.rules
    }

    /// The postfix token sequence.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub(crate) fn tokens_mut(&mut self) -> &mut Vec<Token> {
        &mut self.tokens
    }

    pub(crate) fn utc_offset(&self) -> UtcOffset {
        self.utc_offset
    }

    pub fn token_text(&self, token: &Token) -> &str {
        token.text(&self.source)
    }

    /// Number of constants indexed during parsing.
    pub fn constant_count(&self) -> u32 {
        self.constants
    }

    /// Constant with the given index (requires [`Rules::CONST_INDEX`]).
    pub fn constant(&self, index: u32) -> Option<&Token> {
        if !self.rules.contains(Rules::CONST_INDEX) {
            return None;
        }
        self.tokens.iter().find(|t| {
            t.opt == index
                && matches!(
                    t.kind,
                    TokenKind::Number
                        | TokenKind::Str
                        | TokenKind::Macro
                        | TokenKind::UserMacro
                        | TokenKind::LldMacro
                )
        })
    }

    /// Function ids referenced by the expression, in reference order.
    pub fn functionids(&self) -> Vec<u64> {
        let mut refs: Vec<(u32, u64)> = self
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::FunctionId)
            .filter_map(|t| Some((t.opt, functionid_of(t, &self.source)?)))
            .collect();
        refs.sort_by_key(|(index, _)| *index);
        refs.into_iter().map(|(_, id)| id).collect()
    }

    /// Assign pre-calculated values to function id tokens. Returns the
    /// number of tokens that received a value.
    pub fn set_functionid_values(&mut self, values: &HashMap<u64, Variant>) -> usize {
        let mut assigned = 0;
        for token in self.tokens.iter_mut() {
            if token.kind != TokenKind::FunctionId {
                continue;
            }
            let id = functionid_of(token, &self.source);
            if let Some(value) = id.and_then(|id| values.get(&id)) {
                token.value = value.clone();
                assigned += 1;
            }
        }
        assigned
    }

    /// Point every reference to function `old` at function `new`. The new id
    /// becomes the token value and the token is marked as replaced.
    pub fn replace_functionid(&mut self, old: u64, new: u64) {
        for token in self.tokens.iter_mut() {
            if token.kind != TokenKind::FunctionId {
                continue;
            }
            let current = match token.value {
                Variant::UInt64(id) => Some(id),
                Variant::None => functionid_of(token, &self.source),
                _ => None,
            };
            if current == Some(old) {
                token.value = Variant::UInt64(new);
                token.opt = REPLACED_FUNCTIONID;
            }
        }
    }

    /// Fails on the first function id not rewritten by
    /// [`replace_functionid`](Self::replace_functionid).
    pub fn validate_replaced_functionids(&self) -> Result<(), EvalError> {
        match self
            .tokens
            .iter()
            .find(|t| t.kind == TokenKind::FunctionId && t.opt != REPLACED_FUNCTIONID)
        {
            Some(token) => Err(EvalError::new(format!(
                "non-updated functionid found at \"{}\"",
                self.source.get(token.loc.start..).unwrap_or("")
            ))),
            None => Ok(()),
        }
    }

    /// Move item query literals out of the context. Returns the queries in
    /// postfix order; each query token gets its index in that list as value.
    pub fn extract_item_refs(&mut self) -> Vec<String> {
        let mut refs = Vec::new();
        for token in self.tokens.iter_mut() {
            if token.kind != TokenKind::ArgQuery {
                continue;
            }
            let query = match &token.value {
                Variant::Str(query) => query.clone(),
                _ => token.text(&self.source).to_string(),
            };
            refs.push(query);
            token.value = Variant::UInt64(refs.len() as u64 - 1);
        }
        refs
    }

    /// Cache form of the parsed context.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Resolve macro tokens through `resolver`, which receives the macro
    /// kind and text and returns its value. Compound numeric constants are
    /// resolved fragment by fragment. Returns the number of resolved tokens.
    pub fn resolve_macros<F>(&mut self, mut resolver: F) -> usize
    where
        F: FnMut(TokenKind, &str) -> Option<String>,
    {
        let mut resolved = 0;
        for token in self.tokens.iter_mut() {
            let text = token.text(&self.source);
            match token.kind {
                TokenKind::Macro | TokenKind::UserMacro | TokenKind::LldMacro => {
                    if let Some(value) = resolver(token.kind, text) {
                        token.value = Variant::Str(value);
                        resolved += 1;
                    }
                }
                TokenKind::Number if text.contains('{') => {
                    let mut expanded = String::new();
                    let mut complete = true;
                    for (fragment, kind) in scan_macro_fragments(text) {
                        match kind {
                            Some(kind) => match resolver(kind, fragment) {
                                Some(value) => expanded.push_str(&value),
                                None => complete = false,
                            },
                            None => expanded.push_str(fragment),
                        }
                    }
                    if complete {
                        token.value = match parse_suffixed(&expanded) {
                            Some(v) => Variant::Double(v),
                            None => Variant::Str(expanded),
                        };
                        resolved += 1;
                    }
                }
                _ => {}
            }
        }
        resolved
    }

    /// True when the result depends on the evaluation time.
    pub fn has_timer_functions(&self) -> bool {
        self.tokens.iter().any(|t| {
            t.kind == TokenKind::Function && TIMER_FUNCTIONS.contains(&t.text(&self.source))
        })
    }

    /// True when the expression references macros of the given kind.
    pub fn has_macro(&self, kind: TokenKind) -> bool {
        self.tokens.iter().any(|t| {
            t.kind == kind
                || (t.kind == TokenKind::Number
                    && scan_macro_fragments(t.text(&self.source))
                        .any(|(_, fragment_kind)| fragment_kind == Some(kind)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_functionids_in_reference_order() {
        let ctx = EvalContext::parse("{12} > 1 or {7} < {12}", Rules::TRIGGER_EXPRESSION).unwrap();
        assert_eq!(ctx.functionids(), vec![12, 7, 12]);
    }

    #[test]
    fn test_replace_functionids() {
        let mut ctx = EvalContext::parse("{12} > 1 or {7} < {12}", Rules::TRIGGER_EXPRESSION).unwrap();
        ctx.replace_functionid(12, 100);
        let err = ctx.validate_replaced_functionids().unwrap_err();
        assert_eq!(err.message, "non-updated functionid found at \"{7} < {12}\"");

        ctx.replace_functionid(7, 200);
        assert!(ctx.validate_replaced_functionids().is_ok());
        let values: Vec<&Variant> = ctx
            .tokens()
            .iter()
            .filter(|t| t.kind == TokenKind::FunctionId)
            .map(|t| &t.value)
            .collect();
        assert_eq!(
            values,
            vec![&Variant::UInt64(100), &Variant::UInt64(200), &Variant::UInt64(100)]
        );
    }

    #[test]
    fn test_replace_uses_assigned_ids() {
        let mut ctx = EvalContext::parse("{1} + {2}", Rules::TRIGGER_EXPRESSION).unwrap();
        ctx.replace_functionid(1, 2);
        ctx.replace_functionid(2, 3);
        // the first token now carries id 2 and is rewritten again
        assert_eq!(ctx.tokens()[0].value, Variant::UInt64(3));
        assert_eq!(ctx.tokens()[1].value, Variant::UInt64(3));
    }

    #[test]
    fn test_extract_item_refs() {
        let mut ctx = EvalContext::parse(
            "last(/host/key) + avg(//agent.ping, 1h) - count(/h/k?[tag = \"a\"])",
            Rules::CALC_EXPRESSION,
        )
        .unwrap();
        ctx.tokens_mut()[0].value = Variant::from("/other/key");
        let refs = ctx.extract_item_refs();
        assert_eq!(refs, vec!["/other/key", "//agent.ping", "/h/k?[tag = \"a\"]"]);
        let indexes: Vec<Variant> = ctx
            .tokens()
            .iter()
            .filter(|t| t.kind == TokenKind::ArgQuery)
            .map(|t| t.value.clone())
            .collect();
        assert_eq!(
            indexes,
            vec![Variant::UInt64(0), Variant::UInt64(1), Variant::UInt64(2)]
        );
    }

    #[test]
    fn test_cache_round_trip() {
        let mut ctx = EvalContext::parse("{1} * 2 > {$LIMIT}", Rules::TRIGGER_EXPRESSION).unwrap();
        ctx.resolve_macros(|_, _| Some("10".to_string()));
        ctx.set_functionid_values(&HashMap::from([(1, Variant::Double(6.0))]));

        let cached = EvalContext::from_bytes(&ctx.to_bytes().unwrap()).unwrap();
        assert_eq!(cached.source(), ctx.source());
        assert_eq!(cached.rules(), ctx.rules());
        assert_eq!(cached.tokens(), ctx.tokens());
        assert_eq!(
            cached.execute(&Timestamp::from_secs(0)).unwrap(),
            Variant::Double(1.0)
        );
    }

    #[test]
    fn test_local_offset_falls_back_to_utc() {
        let expected = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
        assert_eq!(local_offset(), expected);
    }

    #[test]
    fn test_set_functionid_values() {
        let mut ctx = EvalContext::parse("{1} + {2}", Rules::TRIGGER_EXPRESSION).unwrap();
        let values = HashMap::from([(1, Variant::UInt64(5))]);
        assert_eq!(ctx.set_functionid_values(&values), 1);
        let first = &ctx.tokens()[0];
        assert_eq!(first.value, Variant::UInt64(5));
        assert_eq!(ctx.tokens()[1].value, Variant::None);
    }

    #[test]
    fn test_resolve_compound_constant() {
        let mut ctx = EvalContext::parse("{$A}.{$B}K > 1", Rules::TRIGGER_EXPRESSION).unwrap();
        let count = ctx.resolve_macros(|kind, text| {
            assert_eq!(kind, TokenKind::UserMacro);
            match text {
                "{$A}" => Some("1".to_string()),
                "{$B}" => Some("5".to_string()),
                _ => None,
            }
        });
        assert_eq!(count, 1);
        assert_eq!(ctx.tokens()[0].value, Variant::Double(1.5 * 1024.0));
        assert!(ctx.has_macro(TokenKind::UserMacro));
        assert!(!ctx.has_macro(TokenKind::LldMacro));
    }

    #[test]
    fn test_constants_by_index() {
        let ctx = EvalContext::parse(
            "\"a\" = \"b\" or 5 > 1",
            Rules::TRIGGER_EXPRESSION | Rules::CONST_INDEX,
        )
        .unwrap();
        assert_eq!(ctx.constant_count(), 4);
        let third = ctx.constant(2).unwrap();
        assert_eq!(ctx.token_text(third), "5");
        assert!(ctx.constant(4).is_none());
    }

    #[test]
    fn test_timer_functions() {
        let rules = Rules::CALC_EXPRESSION;
        assert!(EvalContext::parse("dayofweek() = 1", rules).unwrap().has_timer_functions());
        assert!(!EvalContext::parse("abs(1)", rules).unwrap().has_timer_functions());
    }

    #[test]
    fn test_exception_context_source() {
        let ctx = EvalContext::with_exception("bad \"value\"");
        assert_eq!(ctx.source(), r#"throw("bad \"value\"")"#);
        assert_eq!(ctx.token_text(&ctx.tokens()[0]), r#""bad \"value\"""#);
        assert_eq!(ctx.token_text(&ctx.tokens()[1]), "throw");
    }
}
