//! Turning a parsed context back into expression text.

use super::context::EvalContext;
use super::token::{TokenClass, TokenKind};

/// Priority given to fragments that never need parentheses.
const ATOM: u8 = 0;

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

impl EvalContext {
    /// Source text with every operand that carries a value replaced by that
    /// value. String literals stay quoted.
    pub fn compose(&self) -> String {
        let mut tokens: Vec<_> = self
            .tokens()
            .iter()
            .filter(|t| !t.value.is_none() && !t.loc.is_empty())
            .filter(|t| t.class().contains(TokenClass::OPERAND))
            .collect();
        tokens.sort_by_key(|t| t.loc.start);

        let source = self.source();
        let mut out = String::with_capacity(source.len());
        let mut pos = 0;
        for token in tokens {
            if token.loc.start < pos {
                continue;
            }
            out.push_str(&source[pos..token.loc.start]);
            let text = token.value.value_desc();
            if token.kind == TokenKind::Str {
                out.push_str(&quote(&text));
            } else {
                out.push_str(&text);
            }
            pos = token.loc.end;
        }
        out.push_str(&source[pos..]);
        out
    }

    /// Rebuild infix text from the postfix sequence, adding only the
    /// parentheses operator priorities require.
    pub fn to_infix(&self) -> String {
        let mut stack: Vec<(String, u8)> = Vec::new();

        for token in self.tokens() {
            let kind = token.kind;
            let class = token.class();

            if class.contains(TokenClass::OPERATOR1) {
                let Some((operand, priority)) = stack.pop() else {
                    continue;
                };
                let operand = if priority > kind.priority() {
                    format!("({})", operand)
                } else {
                    operand
                };
                let text = match kind {
                    TokenKind::OpNot => format!("not {}", operand),
                    _ => format!("-{}", operand),
                };
                stack.push((text, kind.priority()));
            } else if class.contains(TokenClass::OPERATOR2) {
                let (Some((right, rp)), Some((left, lp))) = (stack.pop(), stack.pop()) else {
                    continue;
                };
                let p = kind.priority();
                let left = if lp > p { format!("({})", left) } else { left };
                let right = if rp >= p { format!("({})", right) } else { right };
                stack.push((format!("{} {} {}", left, kind, right), p));
            } else if class.contains(TokenClass::FUNCTION) {
                let argc = (token.opt as usize).min(stack.len());
                let args: Vec<String> = stack
                    .split_off(stack.len() - argc)
                    .into_iter()
                    .map(|(text, _)| text)
                    .collect();
                let name = self.token_text(token);
                stack.push((format!("{}({})", name, args.join(",")), ATOM));
            } else if class.contains(TokenClass::EXCEPTION) {
                let arg = stack.pop().map(|(text, _)| text).unwrap_or_default();
                stack.push((format!("throw({})", arg), ATOM));
            } else {
                // operands and properties keep their source text
                stack.push((self.token_text(token).to_string(), ATOM));
            }
        }

        stack
            .into_iter()
            .map(|(text, _)| text)
            .collect::<Vec<_>>()
            .join(" ")
    }
}
