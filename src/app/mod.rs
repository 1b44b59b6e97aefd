use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use monexpr::config::{BatchConfig, ExpressionConfig, MacroValues, RulesPreset, parse_assignment};
use monexpr::dsl::{EvalContext, Rules, Timestamp, Token, TokenKind};
use monexpr::query::{compute_group_filter, prepare_property_filter};
use monexpr::utils::{TagMatch, build_tag_map, matches_tag};
use monexpr::variant::Variant;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Number of threads (default: all cores)
    #[arg(short, long, global = true)]
    pub threads: Option<usize>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Parse and evaluate one expression
    Eval {
        expression: String,

        /// Grammar rules to parse with
        #[arg(short, long, value_enum, default_value_t = RulesPreset::Calc)]
        rules: RulesPreset,

        /// Evaluation time in seconds (default: now)
        #[arg(long)]
        timestamp: Option<i64>,

        /// Macro value, e.g. --macro '{$LIMIT}=10K'
        #[arg(short, long = "macro", value_parser = parse_assignment)]
        macros: Vec<(String, String)>,

        /// Function id value, e.g. --functionid 12=5
        #[arg(short, long = "functionid", value_parser = parse_assignment)]
        functionids: Vec<(String, String)>,

        /// Print the postfix token sequence before the value
        #[arg(long)]
        postfix: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parse only and print the postfix sequence and its infix form
    Check {
        expression: String,

        #[arg(short, long, value_enum, default_value_t = RulesPreset::Calc)]
        rules: RulesPreset,
    },

    /// Simplify a tag/group filter and test it against a candidate
    Filter {
        filter: String,

        /// Candidate host group
        #[arg(short, long = "group")]
        groups: Vec<String>,

        /// Candidate tag, NAME[:VALUE]
        #[arg(long = "tag")]
        tags: Vec<TagMatch>,

        /// Macro value used inside the filter
        #[arg(short, long = "macro", value_parser = parse_assignment)]
        macros: Vec<(String, String)>,
    },

    /// Evaluate every expression of a YAML batch file
    Batch {
        file: PathBuf,
    },
}

#[derive(Debug, Serialize)]
pub struct Outcome {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Variant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `false` when an expectation was given and not met.
    pub passed: bool,
}

fn timestamp_or_now(sec: Option<i64>) -> Timestamp {
    sec.map(Timestamp::from_secs).unwrap_or_else(Timestamp::now)
}

fn describe_token(ctx: &EvalContext, token: &Token) -> String {
    match token.kind {
        TokenKind::ArgNull => "<null>".to_string(),
        TokenKind::Function | TokenKind::HistFunction => {
            format!("{}/{}", ctx.token_text(token), token.opt)
        }
        _ if token.loc.is_empty() => token.kind.to_string(),
        _ => ctx.token_text(token).to_string(),
    }
}

pub fn postfix_line(ctx: &EvalContext) -> String {
    ctx.tokens()
        .iter()
        .map(|t| describe_token(ctx, t))
        .collect::<Vec<_>>()
        .join(" ")
}

fn functionid_map(values: &[(String, String)]) -> Result<HashMap<u64, Variant>> {
    values
        .iter()
        .map(|(id, value)| {
            let id = id
                .parse::<u64>()
                .with_context(|| format!("CLI: Invalid function id '{}'", id))?;
            Ok((id, Variant::from(value.as_str()).numeric_or_self()))
        })
        .collect()
}

pub fn run_eval(
    expression: &str,
    rules: RulesPreset,
    timestamp: Option<i64>,
    macros: &[(String, String)],
    functionids: &[(String, String)],
    postfix: bool,
    json: bool,
) -> Result<()> {
    let mut ctx = EvalContext::parse(expression, rules.rules())
        .with_context(|| format!("Parser: Cannot parse expression '{}'", expression))?;

    let values = MacroValues(macros.iter().cloned().collect());
    let resolved = ctx.resolve_macros(|kind, text| values.resolve(kind, text));
    let assigned = ctx.set_functionid_values(&functionid_map(functionids)?);
    tracing::info!("Resolved {} macros, assigned {} function values", resolved, assigned);

    if postfix {
        println!("{}", postfix_line(&ctx));
    }

    let value = ctx
        .execute(&timestamp_or_now(timestamp))
        .context("Executor: Evaluation failed")?;

    if json {
        let line = serde_json::to_string(&value).context("CLI: Failed to encode result")?;
        println!("{}", line);
    } else {
        println!("{}", value);
    }
    Ok(())
}

pub fn run_check(expression: &str, rules: RulesPreset) -> Result<()> {
    let ctx = EvalContext::parse(expression, rules.rules())
        .with_context(|| format!("Parser: Cannot parse expression '{}'", expression))?;
    println!("postfix: {}", postfix_line(&ctx));
    println!("infix: {}", ctx.to_infix());
    if ctx.has_timer_functions() {
        println!("time dependent: yes");
    }
    Ok(())
}

pub fn run_filter(
    filter: &str,
    groups: &[String],
    tags: &[TagMatch],
    macros: &[(String, String)],
) -> Result<bool> {
    let mut ctx = EvalContext::parse(filter, Rules::QUERY_EXPRESSION)
        .with_context(|| format!("Parser: Cannot parse filter '{}'", filter))?;
    let values = MacroValues(macros.iter().cloned().collect());
    ctx.resolve_macros(|kind, text| values.resolve(kind, text));

    let result = compute_group_filter(&ctx)
        .map_err(|err| anyhow!("Filter: Cannot compute group filter: {}", err))?;
    match &result.template {
        Some(template) => println!("template: {} {:?}", template, result.groups),
        None => println!("template: none"),
    }

    prepare_property_filter(&mut ctx);
    let candidate_tags = build_tag_map(tags.iter());
    let check = |name: &str, args: &[Variant], _: &Timestamp| -> Result<Variant, String> {
        let text = args
            .first()
            .and_then(Variant::to_text)
            .ok_or_else(|| format!("invalid argument for {}", name))?;
        let found = match name {
            "group" => groups.iter().any(|g| *g == text),
            "tag" => {
                let tag_match: TagMatch = text.parse()?;
                matches_tag(&tag_match, &candidate_tags)
            }
            _ => return Err("unknown property".to_string()),
        };
        Ok(Variant::UInt64(found as u64))
    };

    let value = ctx
        .execute_with_callbacks(&Timestamp::now(), Some(&check), None)
        .context("Executor: Filter evaluation failed")?;
    let matched = value.to_double().is_some_and(|v| v != 0.0);
    println!("match: {}", matched);
    Ok(matched)
}

fn expectation_met(expect: &str, value: &Variant) -> bool {
    let expected = Variant::from(expect).numeric_or_self();
    expected.compare(&value.numeric_or_self()) == std::cmp::Ordering::Equal
}

fn evaluate_entry(
    entry: &ExpressionConfig,
    rules: Rules,
    ts: &Timestamp,
    macros: &MacroValues,
    functionids: &HashMap<u64, Variant>,
) -> Outcome {
    let result = EvalContext::parse(&entry.expression, rules)
        .map_err(|err| err.to_string())
        .and_then(|mut ctx| {
            ctx.resolve_macros(|kind, text| macros.resolve(kind, text));
            ctx.set_functionid_values(functionids);
            ctx.execute(ts).map_err(|err| err.to_string())
        });

    match result {
        Ok(value) => Outcome {
            name: entry.name.clone(),
            passed: entry
                .expect
                .as_deref()
                .is_none_or(|expect| expectation_met(expect, &value)),
            value: Some(value),
            error: None,
        },
        Err(error) => Outcome {
            name: entry.name.clone(),
            value: None,
            error: Some(error),
            passed: entry.expect.is_none(),
        },
    }
}

pub fn run_batch(file: &Path) -> Result<Vec<Outcome>> {
    let config = BatchConfig::load(file)
        .with_context(|| format!("Config: Failed to load batch file {}", file.display()))?;
    let rules = config.rules.rules();
    let ts = timestamp_or_now(config.timestamp);
    let macros = config.macro_values();
    let functionids = config.functionid_values();
    tracing::info!(
        "Evaluating {} expressions at {}",
        config.expressions.len(),
        ts.sec
    );

    let outcomes: Vec<Outcome> = config
        .expressions
        .par_iter()
        .map(|entry| evaluate_entry(entry, rules, &ts, &macros, &functionids))
        .collect();

    for outcome in &outcomes {
        let line = serde_json::to_string(outcome).context("CLI: Failed to encode result")?;
        println!("{}", line);
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expectation_compares_numbers() {
        assert!(expectation_met("1", &Variant::Double(1.0)));
        assert!(expectation_met("1K", &Variant::UInt64(1024)));
        assert!(expectation_met("abc", &Variant::from("abc")));
        assert!(!expectation_met("0", &Variant::Double(1.0)));
    }

    #[test]
    fn test_evaluate_entry_reports_errors() {
        let entry = ExpressionConfig {
            name: "bad".to_string(),
            expression: "1 / 0".to_string(),
            expect: Some("1".to_string()),
        };
        let outcome = evaluate_entry(
            &entry,
            Rules::CALC_EXPRESSION,
            &Timestamp::from_secs(0),
            &MacroValues::default(),
            &HashMap::new(),
        );
        assert!(!outcome.passed);
        assert!(outcome.error.unwrap().contains("division by zero"));
    }

    #[test]
    fn test_postfix_line() {
        let ctx = EvalContext::parse("max(1,,2) + 3", Rules::CALC_EXPRESSION).unwrap();
        assert_eq!(postfix_line(&ctx), "1 <null> 2 max/3 3 +");
    }
}
