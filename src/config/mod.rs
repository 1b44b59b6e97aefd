use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::dsl::{Rules, TokenKind};
use crate::variant::Variant;

/// Batch of expressions evaluated together by the `batch` command.
#[derive(Debug, Deserialize, Serialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub rules: RulesPreset,
    /// Evaluation time in seconds; the current time when omitted.
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub macros: Vec<MacroValue>,
    #[serde(default)]
    pub functionids: Vec<FunctionIdValue>,
    pub expressions: Vec<ExpressionConfig>,
}

impl BatchConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn macro_values(&self) -> MacroValues {
        MacroValues(
            self.macros
                .iter()
                .map(|m| (m.name.clone(), m.value.clone()))
                .collect(),
        )
    }

    /// Pre-calculated function id values. Values that look like numbers are
    /// passed as numbers.
    pub fn functionid_values(&self) -> HashMap<u64, Variant> {
        self.functionids
            .iter()
            .map(|f| (f.id, Variant::from(f.value.as_str()).numeric_or_self()))
            .collect()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MacroValue {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FunctionIdValue {
    pub id: u64,
    pub value: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExpressionConfig {
    pub name: String,
    pub expression: String,
    /// Expected result, compared numerically when both sides are numbers.
    pub expect: Option<String>,
}

/// Named rule sets, one per expression flavour the engine understands.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RulesPreset {
    Math,
    Trigger,
    #[default]
    Calc,
    Query,
    Lld,
    Correlation,
    Macro,
}

impl RulesPreset {
    pub fn rules(self) -> Rules {
        match self {
            RulesPreset::Math => Rules::BASIC_MATH,
            RulesPreset::Trigger => Rules::TRIGGER_EXPRESSION,
            RulesPreset::Calc => Rules::CALC_EXPRESSION,
            RulesPreset::Query => Rules::QUERY_EXPRESSION,
            RulesPreset::Lld => Rules::LLD_FILTER_EXPRESSION,
            RulesPreset::Correlation => Rules::CORRELATION_EXPRESSION,
            RulesPreset::Macro => Rules::EXPRESSION_MACRO,
        }
    }
}

impl fmt::Display for RulesPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RulesPreset::Math => "math",
            RulesPreset::Trigger => "trigger",
            RulesPreset::Calc => "calc",
            RulesPreset::Query => "query",
            RulesPreset::Lld => "lld",
            RulesPreset::Correlation => "correlation",
            RulesPreset::Macro => "macro",
        };
        f.write_str(name)
    }
}

impl FromStr for RulesPreset {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "math" => Ok(RulesPreset::Math),
            "trigger" => Ok(RulesPreset::Trigger),
            "calc" => Ok(RulesPreset::Calc),
            "query" => Ok(RulesPreset::Query),
            "lld" => Ok(RulesPreset::Lld),
            "correlation" => Ok(RulesPreset::Correlation),
            "macro" => Ok(RulesPreset::Macro),
            _ => Err(format!("invalid rules preset: {value}")),
        }
    }
}

/// Macro values looked up by their full text, e.g. `{$LIMIT}` or
/// `{$LIMIT:"eth0"}`. A user macro with context falls back to the value of
/// the macro without context.
#[derive(Debug, Default, Clone)]
pub struct MacroValues(pub HashMap<String, String>);

impl MacroValues {
    pub fn resolve(&self, kind: TokenKind, text: &str) -> Option<String> {
        if let Some(value) = self.0.get(text) {
            return Some(value.clone());
        }
        if kind != TokenKind::UserMacro {
            return None;
        }
        let (name, _) = text.split_once(':')?;
        self.0.get(&format!("{}}}", name)).cloned()
    }
}

/// Parse `KEY=VALUE` pairs given on the command line.
pub fn parse_assignment(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(format!("invalid assignment: {value}")),
    }
}
