//! Property filter rewriting and group filter simplification.

use serde::Serialize;

use crate::dsl::lexer::unquote;
use crate::dsl::{EvalContext, Token, TokenKind};

/// Rewrite `prop = value` into `prop(value)` and `prop <> value` into
/// `not prop(value)`, for either operand order. The property token becomes a
/// one argument function call located at the property keyword.
pub fn prepare_property_filter(ctx: &mut EvalContext) {
    let tokens = ctx.tokens_mut();
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());

    for token in tokens.drain(..) {
        let is_cmp = matches!(token.kind, TokenKind::OpEq | TokenKind::OpNe);
        if is_cmp && out.len() >= 2 {
            let n = out.len();
            let (a, b) = (&out[n - 2], &out[n - 1]);
            let is_prop = |t: &Token| matches!(t.kind, TokenKind::PropTag | TokenKind::PropGroup);
            let pair = if is_prop(a) && b.kind.is_filter_value() {
                Some((n - 2, n - 1))
            } else if is_prop(b) && a.kind.is_filter_value() {
                Some((n - 1, n - 2))
            } else {
                None
            };

            if let Some((prop_at, value_at)) = pair {
                let value = out[value_at].clone();
                let mut call = out[prop_at].clone();
                call.kind = TokenKind::Function;
                call.opt = 1;
                out.truncate(n - 2);
                out.push(value);
                out.push(call);
                if token.kind == TokenKind::OpNe {
                    out.push(Token::new(TokenKind::OpNot, token.loc));
                }
                continue;
            }
        }
        out.push(token);
    }

    *tokens = out;
}

/// Group names a filter restricts candidates to, and how they combine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupFilterResult {
    pub groups: Vec<String>,
    /// Boolean expression over `{N}` placeholders indexing `groups`. `None`
    /// when the filter cannot be narrowed by groups.
    pub template: Option<String>,
}

impl GroupFilterResult {
    /// Replace every `{N}` placeholder with `render(groups[N])`.
    pub fn expand<F>(&self, mut render: F) -> Option<String>
    where
        F: FnMut(&str) -> String,
    {
        let template = self.template.as_deref()?;
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}');
            let group = close
                .and_then(|close| after[..close].parse::<usize>().ok())
                .and_then(|index| self.groups.get(index));
            match (group, close) {
                (Some(name), Some(close)) => {
                    out.push_str(&render(name));
                    rest = &after[close + 1..];
                }
                _ => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        Some(out)
    }
}

/// Values of the simplified replay.
#[derive(Debug, Clone)]
enum Node {
    Value(String),
    Group(String),
    /// Anything depending on tags; cannot narrow by group.
    Tag,
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
}

fn literal(ctx: &EvalContext, token: &Token) -> String {
    if !token.value.is_none() {
        if let Some(text) = token.value.to_text() {
            return text;
        }
    }
    let text = ctx.token_text(token);
    if token.kind == TokenKind::Str {
        unquote(text)
    } else {
        text.to_string()
    }
}

fn replay(ctx: &EvalContext) -> Result<Node, String> {
    let mut stack: Vec<Node> = Vec::new();
    let unexpected = |token: &Token| {
        format!(
            "unexpected token at \"{}\"",
            ctx.source().get(token.loc.start..).unwrap_or("")
        )
    };

    for token in ctx.tokens() {
        let node = match token.kind {
            kind if kind.is_filter_value() => Node::Value(literal(ctx, token)),
            TokenKind::Function if token.opt == 1 => {
                let Some(Node::Value(value)) = stack.pop() else {
                    return Err(unexpected(token));
                };
                match ctx.token_text(token) {
                    "group" => Node::Group(value),
                    "tag" => Node::Tag,
                    _ => return Err(unexpected(token)),
                }
            }
            TokenKind::OpNot => match stack.pop() {
                Some(Node::Tag) => Node::Tag,
                Some(Node::Value(_)) | None => return Err(unexpected(token)),
                Some(node) => Node::Not(Box::new(node)),
            },
            TokenKind::OpAnd | TokenKind::OpOr => {
                let (Some(right), Some(left)) = (stack.pop(), stack.pop()) else {
                    return Err(unexpected(token));
                };
                if matches!(left, Node::Value(_)) || matches!(right, Node::Value(_)) {
                    return Err(unexpected(token));
                }
                match (token.kind, left, right) {
                    (TokenKind::OpAnd, Node::Tag, other) | (TokenKind::OpAnd, other, Node::Tag) => {
                        other
                    }
                    (TokenKind::OpOr, Node::Tag, _) | (TokenKind::OpOr, _, Node::Tag) => Node::Tag,
                    (TokenKind::OpAnd, left, right) => Node::And(Box::new(left), Box::new(right)),
                    (_, left, right) => Node::Or(Box::new(left), Box::new(right)),
                }
            }
            _ => return Err(unexpected(token)),
        };
        stack.push(node);
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(node), true) if !matches!(node, Node::Value(_)) => Ok(node),
        _ => Err("invalid filter expression".to_string()),
    }
}

fn render(node: &Node, groups: &mut Vec<String>, out: &mut String) {
    match node {
        Node::Group(name) => {
            let index = match groups.iter().position(|g| g == name) {
                Some(index) => index,
                None => {
                    groups.push(name.clone());
                    groups.len() - 1
                }
            };
            out.push_str(&format!("{{{}}}", index));
        }
        Node::Not(inner) => {
            out.push_str("not ");
            render_operand(inner, matches!(**inner, Node::And(..) | Node::Or(..)), groups, out);
        }
        Node::And(left, right) => {
            render_operand(left, matches!(**left, Node::Or(..)), groups, out);
            out.push_str(" and ");
            render_operand(right, matches!(**right, Node::Or(..)), groups, out);
        }
        Node::Or(left, right) => {
            render(left, groups, out);
            out.push_str(" or ");
            render(right, groups, out);
        }
        // eliminated by replay
        Node::Tag | Node::Value(_) => {}
    }
}

fn render_operand(node: &Node, parenthesize: bool, groups: &mut Vec<String>, out: &mut String) {
    if parenthesize {
        out.push('(');
        render(node, groups, out);
        out.push(')');
    } else {
        render(node, groups, out);
    }
}

/// Reduce a tag/group filter to the group conditions that must hold for a
/// candidate to match. The context is left untouched; rewriting happens on a
/// copy.
pub fn compute_group_filter(ctx: &EvalContext) -> Result<GroupFilterResult, String> {
    let mut prepared = ctx.clone();
    prepare_property_filter(&mut prepared);

    let node = replay(&prepared)?;
    let mut groups = Vec::new();
    let template = match node {
        Node::Tag => None,
        node => {
            let mut out = String::new();
            render(&node, &mut groups, &mut out);
            Some(out)
        }
    };

    tracing::debug!(
        "group filter for \"{}\": groups {:?}, template {:?}",
        ctx.source(),
        groups,
        template
    );
    Ok(GroupFilterResult { groups, template })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::Rules;

    fn filter(expr: &str) -> GroupFilterResult {
        let ctx = EvalContext::parse(expr, Rules::QUERY_EXPRESSION).unwrap();
        compute_group_filter(&ctx).unwrap()
    }

    fn kinds(ctx: &EvalContext) -> Vec<TokenKind> {
        ctx.tokens().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_prepare_rewrites_both_orders() {
        let mut ctx =
            EvalContext::parse(r#"tag = "a" and "Linux" <> group"#, Rules::QUERY_EXPRESSION).unwrap();
        prepare_property_filter(&mut ctx);
        assert_eq!(
            kinds(&ctx),
            vec![
                TokenKind::Str,
                TokenKind::Function,
                TokenKind::Str,
                TokenKind::Function,
                TokenKind::OpNot,
                TokenKind::OpAnd,
            ]
        );
        assert_eq!(ctx.token_text(&ctx.tokens()[3]), "group");
        assert_eq!(ctx.tokens()[3].opt, 1);
    }

    #[test]
    fn test_tag_dropped_under_and() {
        let result = filter(r#"group = "Linux" and tag = "env:prod""#);
        assert_eq!(result.groups, vec!["Linux".to_string()]);
        assert_eq!(result.template.as_deref(), Some("{0}"));
    }

    #[test]
    fn test_tag_under_or_disables_narrowing() {
        let result = filter(r#"group = "Linux" or tag = "env:prod""#);
        assert_eq!(result.template, None);
        assert!(result.groups.is_empty());
    }

    #[test]
    fn test_groups_deduplicated_in_order() {
        let result = filter(r#"(group = "B" or group = "A") and not (group = "B")"#);
        assert_eq!(result.groups, vec!["B".to_string(), "A".to_string()]);
        assert_eq!(result.template.as_deref(), Some("({0} or {1}) and not {0}"));
    }

    #[test]
    fn test_not_group_comparison() {
        let result = filter(r#"group <> "Windows""#);
        assert_eq!(result.template.as_deref(), Some("not {0}"));
        let result = filter(r#"not (group = "A" and group = "B")"#);
        assert_eq!(result.template.as_deref(), Some("not ({0} and {1})"));
    }

    #[test]
    fn test_not_tag_is_tag() {
        let result = filter(r#"not (tag = "a") and group = "G""#);
        assert_eq!(result.template.as_deref(), Some("{0}"));
    }

    #[test]
    fn test_context_left_unprepared() {
        let ctx = EvalContext::parse(r#"group = "Linux""#, Rules::QUERY_EXPRESSION).unwrap();
        compute_group_filter(&ctx).unwrap();
        assert_eq!(ctx.tokens()[0].kind, TokenKind::PropGroup);
    }

    #[test]
    fn test_expand_template() {
        let result = filter(r#"group = "A" and (group = "B" or group = "A")"#);
        let sql = result.expand(|name| format!("g.name='{}'", name)).unwrap();
        assert_eq!(sql, "g.name='A' and (g.name='B' or g.name='A')");
    }
}
