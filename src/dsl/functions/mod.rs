//! Builtin function library.
//!
//! Lookup is a static name match. Every builtin first checks its argument
//! count, then returns the first error argument unchanged, and only then runs
//! its body. Bodies report failures as plain messages; the executor turns
//! them into error values carrying the call location.

mod bitwise;
mod datetime;
mod document;
mod math;
mod stats;
mod string;

use time::UtcOffset;

use crate::dsl::context::Timestamp;
use crate::variant::Variant;

/// Environment passed to function bodies.
pub(crate) struct CallEnv<'a> {
    pub ts: &'a Timestamp,
    pub utc_offset: UtcOffset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arity {
    Exact(usize),
    Range(usize, usize),
    AtLeast(usize),
}

impl Arity {
    fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::Range(min, max) => (min..=max).contains(&count),
            Arity::AtLeast(n) => count >= n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    // aggregates
    Min,
    Max,
    Sum,
    Avg,
    Count,
    Kurtosis,
    Mad,
    Skewness,
    StddevPop,
    StddevSamp,
    SumOfSquares,
    VarPop,
    VarSamp,
    HistogramQuantile,
    // strings
    Length,
    Left,
    Right,
    Mid,
    Concat,
    Insert,
    Replace,
    Repeat,
    Trim,
    Ltrim,
    Rtrim,
    Ascii,
    Char,
    ByteLength,
    BitLength,
    In,
    // bitwise
    BitAnd,
    BitOr,
    BitXor,
    BitLshift,
    BitRshift,
    BitNot,
    // time
    Date,
    Time,
    Now,
    DayOfWeek,
    DayOfMonth,
    // math
    Abs,
    Ceil,
    Floor,
    Round,
    Truncate,
    Power,
    Mod,
    Sqrt,
    Log,
    Log10,
    Exp,
    Expm1,
    Cbrt,
    Sin,
    Cos,
    Tan,
    Cot,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Pi,
    E,
    Rand,
    Signum,
    Degrees,
    Radians,
    Between,
    // documents
    JsonPath,
    XmlXPath,
}

/// Names of functions whose result depends on the evaluation time.
pub(crate) const TIMER_FUNCTIONS: [&str; 5] = ["date", "time", "now", "dayofmonth", "dayofweek"];

impl Builtin {
    pub fn lookup(name: &str) -> Option<Builtin> {
        use Builtin::*;
        let builtin = match name {
            "min" => Min,
            "max" => Max,
            "sum" => Sum,
            "avg" => Avg,
            "count" => Count,
            "kurtosis" => Kurtosis,
            "mad" => Mad,
            "skewness" => Skewness,
            "stddevpop" => StddevPop,
            "stddevsamp" => StddevSamp,
            "sumofsquares" => SumOfSquares,
            "varpop" => VarPop,
            "varsamp" => VarSamp,
            "histogram_quantile" => HistogramQuantile,
            "length" => Length,
            "left" => Left,
            "right" => Right,
            "mid" => Mid,
            "concat" => Concat,
            "insert" => Insert,
            "replace" => Replace,
            "repeat" => Repeat,
            "trim" => Trim,
            "ltrim" => Ltrim,
            "rtrim" => Rtrim,
            "ascii" => Ascii,
            "char" => Char,
            "bytelength" => ByteLength,
            "bitlength" => BitLength,
            "in" => In,
            "bitand" => BitAnd,
            "bitor" => BitOr,
            "bitxor" => BitXor,
            "bitlshift" => BitLshift,
            "bitrshift" => BitRshift,
            "bitnot" => BitNot,
            "date" => Date,
            "time" => Time,
            "now" => Now,
            "dayofweek" => DayOfWeek,
            "dayofmonth" => DayOfMonth,
            "abs" => Abs,
            "ceil" => Ceil,
            "floor" => Floor,
            "round" => Round,
            "truncate" => Truncate,
            "power" => Power,
            "mod" => Mod,
            "sqrt" => Sqrt,
            "log" => Log,
            "log10" => Log10,
            "exp" => Exp,
            "expm1" => Expm1,
            "cbrt" => Cbrt,
            "sin" => Sin,
            "cos" => Cos,
            "tan" => Tan,
            "cot" => Cot,
            "asin" => Asin,
            "acos" => Acos,
            "atan" => Atan,
            "atan2" => Atan2,
            "sinh" => Sinh,
            "cosh" => Cosh,
            "pi" => Pi,
            "e" => E,
            "rand" => Rand,
            "signum" => Signum,
            "degrees" => Degrees,
            "radians" => Radians,
            "between" => Between,
            "jsonpath" => JsonPath,
            "xmlxpath" => XmlXPath,
            _ => return None,
        };
        Some(builtin)
    }

    fn arity(self) -> Arity {
        use Builtin::*;
        match self {
            Min | Max | Sum | Avg | Kurtosis | Mad | Skewness | StddevPop | StddevSamp
            | SumOfSquares | VarPop | VarSamp => Arity::AtLeast(1),
            Count => Arity::Range(1, 3),
            HistogramQuantile => Arity::AtLeast(2),
            Length | Ascii | Char | ByteLength | BitLength | BitNot => Arity::Exact(1),
            Left | Right | Repeat => Arity::Exact(2),
            Mid | Replace => Arity::Exact(3),
            Insert => Arity::Exact(4),
            Trim | Ltrim | Rtrim => Arity::Range(1, 2),
            Concat | In => Arity::AtLeast(2),
            BitAnd | BitOr | BitXor | BitLshift | BitRshift => Arity::Exact(2),
            Date | Time | Now | DayOfWeek | DayOfMonth | Pi | E | Rand => Arity::Exact(0),
            Abs | Ceil | Floor | Sqrt | Log | Log10 | Exp | Expm1 | Cbrt | Sin | Cos | Tan
            | Cot | Asin | Acos | Atan | Sinh | Cosh | Signum | Degrees | Radians => Arity::Exact(1),
            Round | Truncate | Power | Mod | Atan2 => Arity::Exact(2),
            Between => Arity::Exact(3),
            JsonPath | XmlXPath => Arity::Range(2, 3),
        }
    }

    fn check_arity(self, count: usize) -> Result<(), String> {
        let parity_ok = match self {
            // quantile plus (bucket, rate) pairs, or quantile plus one vector
            Builtin::HistogramQuantile => count == 2 || count % 2 == 1,
            _ => true,
        };
        if self.arity().accepts(count) && parity_ok {
            Ok(())
        } else {
            Err("invalid number of arguments for function".to_string())
        }
    }

    /// Run the builtin over its arguments.
    pub fn call(self, args: &[Variant], env: &CallEnv<'_>) -> Result<Variant, String> {
        use Builtin::*;

        self.check_arity(args.len())?;
        if let Some(error) = args.iter().find(|a| a.is_error()) {
            return Ok(error.clone());
        }

        match self {
            Min => stats::aggregate(args, stats::Aggregate::Min),
            Max => stats::aggregate(args, stats::Aggregate::Max),
            Sum => stats::aggregate(args, stats::Aggregate::Sum),
            Avg => stats::aggregate(args, stats::Aggregate::Avg),
            Count => stats::count(args),
            Kurtosis => stats::aggregate(args, stats::Aggregate::Kurtosis),
            Mad => stats::aggregate(args, stats::Aggregate::Mad),
            Skewness => stats::aggregate(args, stats::Aggregate::Skewness),
            StddevPop => stats::aggregate(args, stats::Aggregate::StddevPop),
            StddevSamp => stats::aggregate(args, stats::Aggregate::StddevSamp),
            SumOfSquares => stats::aggregate(args, stats::Aggregate::SumOfSquares),
            VarPop => stats::aggregate(args, stats::Aggregate::VarPop),
            VarSamp => stats::aggregate(args, stats::Aggregate::VarSamp),
            HistogramQuantile => stats::histogram_quantile(args),

            Length => string::length(args),
            Left => string::left(args),
            Right => string::right(args),
            Mid => string::mid(args),
            Concat => string::concat(args),
            Insert => string::insert(args),
            Replace => string::replace(args),
            Repeat => string::repeat(args),
            Trim => string::trim(args, string::TrimSide::Both),
            Ltrim => string::trim(args, string::TrimSide::Left),
            Rtrim => string::trim(args, string::TrimSide::Right),
            Ascii => string::ascii(args),
            Char => string::char_from_code(args),
            ByteLength => string::byte_length(args),
            BitLength => string::bit_length(args),
            In => string::contains(args),

            BitAnd => bitwise::binary(args, |a, b| a & b),
            BitOr => bitwise::binary(args, |a, b| a | b),
            BitXor => bitwise::binary(args, |a, b| a ^ b),
            BitLshift => bitwise::binary(args, |a, b| {
                u32::try_from(b).ok().and_then(|b| a.checked_shl(b)).unwrap_or(0)
            }),
            BitRshift => bitwise::binary(args, |a, b| {
                u32::try_from(b).ok().and_then(|b| a.checked_shr(b)).unwrap_or(0)
            }),
            BitNot => bitwise::not(args),

            Date => datetime::date(env),
            Time => datetime::time_of_day(env),
            Now => Ok(Variant::Str(env.ts.sec.to_string())),
            DayOfWeek => datetime::day_of_week(env),
            DayOfMonth => datetime::day_of_month(env),

            Abs => math::unary(args, f64::abs, math::Domain::Any),
            Ceil => math::unary(args, f64::ceil, math::Domain::Any),
            Floor => math::unary(args, f64::floor, math::Domain::Any),
            Sqrt => math::unary(args, f64::sqrt, math::Domain::NonNegative),
            Log => math::unary(args, f64::ln, math::Domain::Positive),
            Log10 => math::unary(args, f64::log10, math::Domain::Positive),
            Exp => math::unary(args, f64::exp, math::Domain::Any),
            Expm1 => math::unary(args, f64::exp_m1, math::Domain::Any),
            Cbrt => math::unary(args, f64::cbrt, math::Domain::Any),
            Sin => math::unary(args, f64::sin, math::Domain::Any),
            Cos => math::unary(args, f64::cos, math::Domain::Any),
            Tan => math::unary(args, f64::tan, math::Domain::Any),
            Cot => math::unary(args, |x| 1.0 / x.tan(), math::Domain::NonZero),
            Asin => math::unary(args, f64::asin, math::Domain::Any),
            Acos => math::unary(args, f64::acos, math::Domain::Any),
            Atan => math::unary(args, f64::atan, math::Domain::Any),
            Sinh => math::unary(args, f64::sinh, math::Domain::Any),
            Cosh => math::unary(args, f64::cosh, math::Domain::Any),
            Signum => math::unary(args, math::signum, math::Domain::Any),
            Degrees => math::unary(args, f64::to_degrees, math::Domain::Any),
            Radians => math::unary(args, f64::to_radians, math::Domain::Any),
            Round => math::binary(args, math::Binary::Round),
            Truncate => math::binary(args, math::Binary::Truncate),
            Power => math::binary(args, math::Binary::Power),
            Mod => math::binary(args, math::Binary::Mod),
            Atan2 => math::binary(args, math::Binary::Atan2),
            Pi => Ok(Variant::Double(std::f64::consts::PI)),
            E => Ok(Variant::Double(std::f64::consts::E)),
            Rand => Ok(Variant::Double(math::random())),
            Between => math::between(args),

            JsonPath => document::jsonpath(args),
            XmlXPath => document::xmlxpath(args),
        }
    }
}

/// Collect numeric arguments: either N scalars or a single non-empty vector.
pub(crate) fn numeric_args(args: &[Variant]) -> Result<Vec<f64>, String> {
    match args {
        [] => Err("no arguments for function".to_string()),
        [Variant::DoubleVector(values)] if values.is_empty() => {
            Err("no input data for function".to_string())
        }
        [Variant::DoubleVector(values)] => Ok(values.clone()),
        _ if args.iter().any(|a| matches!(a, Variant::DoubleVector(_))) => {
            Err("too many arguments for function".to_string())
        }
        _ => args.iter().map(to_number).collect(),
    }
}

/// Convert one scalar argument, accepting suffixed numbers.
pub(crate) fn to_number(arg: &Variant) -> Result<f64, String> {
    arg.to_double_suffixed()
        .ok_or_else(|| format!("invalid function argument \"{}\"", arg.value_desc()))
}

pub(crate) fn to_uint(arg: &Variant) -> Result<u64, String> {
    arg.to_uint64()
        .ok_or_else(|| format!("invalid function argument \"{}\"", arg.value_desc()))
}

pub(crate) fn to_text(arg: &Variant) -> Result<String, String> {
    arg.to_text()
        .ok_or_else(|| format!("invalid function argument \"{}\"", arg.value_desc()))
}

/// Reject NaN and infinite results.
pub(crate) fn finite(value: f64) -> Result<Variant, String> {
    if value.is_finite() {
        Ok(Variant::Double(value))
    } else {
        Err("calculation resulted in NaN or Infinity".to_string())
    }
}

#[cfg(test)]
pub(crate) fn test_env(ts: &Timestamp) -> CallEnv<'_> {
    CallEnv {
        ts,
        utc_offset: UtcOffset::UTC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Variant]) -> Result<Variant, String> {
        let ts = Timestamp::from_secs(0);
        Builtin::lookup(name).unwrap().call(args, &test_env(&ts))
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        assert_eq!(Builtin::lookup("max"), Some(Builtin::Max));
        assert_eq!(Builtin::lookup("MAX"), None);
        assert_eq!(Builtin::lookup("last"), None);
    }

    #[test]
    fn test_arity_checked_before_errors() {
        let err = call("abs", &[Variant::Error("boom".into()), Variant::UInt64(1)]);
        assert_eq!(err.unwrap_err(), "invalid number of arguments for function");
        let passed = call("abs", &[Variant::Error("boom".into())]).unwrap();
        assert_eq!(passed, Variant::Error("boom".into()));
    }

    #[test]
    fn test_numeric_args_shapes() {
        assert_eq!(
            numeric_args(&[Variant::from("1K"), Variant::UInt64(2)]).unwrap(),
            vec![1024.0, 2.0]
        );
        assert_eq!(
            numeric_args(&[Variant::DoubleVector(vec![1.0, 2.0])]).unwrap(),
            vec![1.0, 2.0]
        );
        assert_eq!(
            numeric_args(&[Variant::DoubleVector(vec![])]).unwrap_err(),
            "no input data for function"
        );
        assert_eq!(
            numeric_args(&[Variant::DoubleVector(vec![1.0]), Variant::UInt64(1)]).unwrap_err(),
            "too many arguments for function"
        );
        assert!(numeric_args(&[Variant::from("x")]).is_err());
    }

    #[test]
    fn test_histogram_quantile_parity() {
        assert!(call("histogram_quantile", &[Variant::Double(0.5), Variant::UInt64(1), Variant::UInt64(2), Variant::UInt64(3)]).is_err());
        // parity is checked before error arguments
        let err = call(
            "histogram_quantile",
            &[Variant::Error("x".into()), Variant::UInt64(1), Variant::UInt64(2), Variant::UInt64(3)],
        );
        assert_eq!(err.unwrap_err(), "invalid number of arguments for function");
    }
}
