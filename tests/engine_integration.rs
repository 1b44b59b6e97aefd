use monexpr::dsl::{EvalContext, Rules, Timestamp, TokenClass, TokenKind};
use monexpr::variant::Variant;
use monexpr::{compute_group_filter, parse_item_query};

const EXPRESSIONS: &[&str] = &[
    "1 + 2 * 3",
    "(1 + 2) * 3",
    "10 - (4 - 3) - 2",
    "-(2 + 3) * -1",
    "not (1 and 0) or 0",
    "1K + 1K",
    "max(1, 5, 3) / min(2, 4)",
    "length(concat(\"ab\", \"cd\")) = 4",
    "abs(-3) > 2 and 4 >= 4",
    "\"1K\" = 1024",
    "round(10 / 3, 2)",
    "bitand(12, 10) + bitlshift(1, 3)",
    "between(5, 1, 10) <> 0",
    "(1/0) or 1",
];

fn ts() -> Timestamp {
    Timestamp::from_secs(1710075909)
}

fn eval(expr: &str) -> Variant {
    EvalContext::parse(expr, Rules::CALC_EXPRESSION)
        .unwrap()
        .execute(&ts())
        .unwrap()
}

#[test]
fn evaluates_reference_expressions() {
    assert_eq!(
        EvalContext::parse("1 + 2 * 3", Rules::BASIC_MATH)
            .unwrap()
            .execute(&ts())
            .unwrap(),
        Variant::Double(7.0)
    );
    assert_eq!(eval("1K + 1K"), Variant::Double(2048.0));
    assert_eq!(eval("(1/0) or 1"), Variant::Double(1.0));

    let err = EvalContext::parse("length(1/0)", Rules::CALC_EXPRESSION)
        .unwrap()
        .execute(&ts())
        .unwrap_err();
    assert!(err.message.contains("division by zero"));
    assert!(!err.message.contains("length"));
}

#[test]
fn infix_round_trip_preserves_value() {
    for expr in EXPRESSIONS {
        let infix = EvalContext::parse(expr, Rules::CALC_EXPRESSION)
            .unwrap()
            .to_infix();
        assert_eq!(eval(&infix), eval(expr), "{} -> {}", expr, infix);
    }
}

#[test]
fn infix_recomposition_is_idempotent() {
    for expr in EXPRESSIONS {
        let once = EvalContext::parse(expr, Rules::CALC_EXPRESSION).unwrap();
        let twice = EvalContext::parse(&once.to_infix(), Rules::CALC_EXPRESSION).unwrap();
        let thrice = EvalContext::parse(&twice.to_infix(), Rules::CALC_EXPRESSION).unwrap();
        let kinds = |ctx: &EvalContext| ctx.tokens().iter().map(|t| t.kind).collect::<Vec<_>>();
        assert_eq!(kinds(&once), kinds(&twice), "{}", expr);
        assert_eq!(twice.to_infix(), thrice.to_infix());
    }
}

#[test]
fn function_arity_matches_replayed_operands() {
    let exprs = [
        "max(1, min(2, 3), -4) + foo(,1,)",
        "last(/host/key, 5m) + avg(/h/k[a,b], 1h, \"x\")",
        "concat(\"a\", left(\"abc\", 1 + 1))",
    ];
    for expr in exprs {
        let ctx = EvalContext::parse(expr, Rules::CALC_EXPRESSION).unwrap();
        let mut depth: i64 = 0;
        for token in ctx.tokens() {
            if token.class().contains(TokenClass::FUNCTION) {
                assert!(depth >= token.opt as i64, "{}", expr);
            }
            depth += token.stack_effect();
            assert!(depth >= 1, "{}", expr);
        }
        assert_eq!(depth, 1, "{}", expr);
    }
}

#[test]
fn history_functions_are_classified() {
    let ctx = EvalContext::parse("last(/host/key) + abs(1)", Rules::CALC_EXPRESSION).unwrap();
    let kinds: Vec<TokenKind> = ctx.tokens().iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::ArgQuery,
            TokenKind::HistFunction,
            TokenKind::Number,
            TokenKind::Function,
            TokenKind::OpAdd,
        ]
    );
    let query = parse_item_query(ctx.token_text(&ctx.tokens()[0])).unwrap();
    assert_eq!(query.host.as_deref(), Some("host"));
    assert_eq!(query.key, "key");
}

#[test]
fn group_filter_examples() {
    let ctx = EvalContext::parse(
        r#"group = "Linux" and tag = "env:prod""#,
        Rules::QUERY_EXPRESSION,
    )
    .unwrap();
    let result = compute_group_filter(&ctx).unwrap();
    assert_eq!(result.groups, vec!["Linux".to_string()]);
    assert_eq!(result.template.as_deref(), Some("{0}"));

    let ctx = EvalContext::parse(
        r#"group = "Linux" or tag = "env:prod""#,
        Rules::QUERY_EXPRESSION,
    )
    .unwrap();
    assert_eq!(compute_group_filter(&ctx).unwrap().template, None);
}

#[test]
fn context_is_shared_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<EvalContext>();

    let ctx = std::sync::Arc::new(EvalContext::parse("max(1, 2) * 3", Rules::CALC_EXPRESSION).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ctx = ctx.clone();
            std::thread::spawn(move || ctx.execute(&Timestamp::from_secs(0)).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Variant::Double(6.0));
    }
}
