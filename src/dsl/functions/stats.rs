//! Aggregate and statistical functions over scalars or a value vector.

use super::{finite, numeric_args, to_number, to_text};
use crate::variant::{Variant, compare_doubles};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Aggregate {
    Min,
    Max,
    Sum,
    Avg,
    Kurtosis,
    Mad,
    Skewness,
    StddevPop,
    StddevSamp,
    SumOfSquares,
    VarPop,
    VarSamp,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sum of `(x - mean)^power`.
fn central_sum(values: &[f64], power: i32) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(power)).sum()
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn sample_size(values: &[f64]) -> Result<f64, String> {
    if values.len() < 2 {
        return Err("not enough values to calculate sample statistics".to_string());
    }
    Ok((values.len() - 1) as f64)
}

pub(crate) fn aggregate(args: &[Variant], kind: Aggregate) -> Result<Variant, String> {
    let mut values = numeric_args(args)?;
    let n = values.len() as f64;

    let result = match kind {
        Aggregate::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        Aggregate::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Aggregate::Sum => values.iter().sum(),
        Aggregate::Avg => mean(&values),
        Aggregate::SumOfSquares => values.iter().map(|v| v * v).sum(),
        Aggregate::VarPop => central_sum(&values, 2) / n,
        Aggregate::VarSamp => central_sum(&values, 2) / sample_size(&values)?,
        Aggregate::StddevPop => (central_sum(&values, 2) / n).sqrt(),
        Aggregate::StddevSamp => (central_sum(&values, 2) / sample_size(&values)?).sqrt(),
        Aggregate::Mad => {
            let center = median(&mut values);
            let mut deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
            median(&mut deviations)
        }
        Aggregate::Skewness => {
            let var = central_sum(&values, 2) / n;
            if compare_doubles(var, 0.0) == Ordering::Equal {
                return Err("cannot calculate skewness, variance is zero".to_string());
            }
            central_sum(&values, 3) / n / var.powf(1.5)
        }
        Aggregate::Kurtosis => {
            let var = central_sum(&values, 2) / n;
            if compare_doubles(var, 0.0) == Ordering::Equal {
                return Err("cannot calculate kurtosis, variance is zero".to_string());
            }
            central_sum(&values, 4) / n / (var * var)
        }
    };
    finite(result)
}

/// `count(vector[, operator[, pattern]])`, or the number of scalar arguments.
pub(crate) fn count(args: &[Variant]) -> Result<Variant, String> {
    let Variant::DoubleVector(values) = &args[0] else {
        if args.iter().any(|a| matches!(a, Variant::DoubleVector(_))) {
            return Err("invalid type of argument for function".to_string());
        }
        return Ok(Variant::UInt64(args.len() as u64));
    };

    if args.len() == 1 {
        return Ok(Variant::UInt64(values.len() as u64));
    }

    let operator = match &args[1] {
        Variant::None => "eq".to_string(),
        other => to_text(other).map_err(|_| "invalid second parameter".to_string())?,
    };
    let operator = if operator.is_empty() { "eq".to_string() } else { operator };
    let pattern = match args.get(2) {
        Some(arg) => to_text(arg).map_err(|_| "invalid third parameter".to_string())?,
        None => return Err("invalid third parameter".to_string()),
    };

    let is_match: Box<dyn Fn(f64) -> bool> = if operator == "bitand" {
        let (value, mask) = match pattern.split_once('/') {
            Some((value, mask)) => (value.trim(), mask.trim()),
            None => (pattern.as_str(), pattern.as_str()),
        };
        let parse = |text: &str| {
            Variant::from(text)
                .to_uint64()
                .ok_or_else(|| "invalid third parameter".to_string())
        };
        let (value, mask) = (parse(value)?, parse(mask)?);
        Box::new(move |v: f64| v >= 0.0 && ((v as u64) & mask) == value)
    } else {
        let reference =
            to_number(&Variant::Str(pattern)).map_err(|_| "invalid third parameter".to_string())?;
        let wanted: &[Ordering] = match operator.as_str() {
            "eq" => &[Ordering::Equal],
            "ne" => &[Ordering::Less, Ordering::Greater],
            "gt" => &[Ordering::Greater],
            "ge" => &[Ordering::Greater, Ordering::Equal],
            "lt" => &[Ordering::Less],
            "le" => &[Ordering::Less, Ordering::Equal],
            _ => return Err("invalid second parameter".to_string()),
        };
        Box::new(move |v: f64| wanted.contains(&compare_doubles(v, reference)))
    };

    let total = values.iter().filter(|v| is_match(**v)).count();
    Ok(Variant::UInt64(total as u64))
}

/// Bucket bounds and counts: numbers, or the strings `+Inf`/`Inf`. Any other
/// string is rejected, even when it looks numeric.
fn bucket_value(arg: &Variant) -> Result<f64, String> {
    match arg {
        Variant::Str(s) => match s.to_ascii_uppercase().as_str() {
            "+INF" | "INF" => Ok(f64::INFINITY),
            _ => Err("invalid string values of bucket".to_string()),
        },
        _ => to_number(arg),
    }
}

/// Quantile over cumulative `(upper bound, count)` buckets with linear
/// interpolation inside the selected bucket.
pub(crate) fn histogram_quantile(args: &[Variant]) -> Result<Variant, String> {
    let mut buckets: Vec<(f64, f64)> = Vec::new();
    if args.len() == 2 {
        let Variant::DoubleVector(values) = &args[1] else {
            return Err("invalid second argument for function".to_string());
        };
        if values.is_empty() || values.len() % 2 != 0 {
            return Err("invalid number of values in bucket vector".to_string());
        }
        buckets.extend(values.chunks(2).map(|pair| (pair[0], pair[1])));
    } else {
        for pair in args[1..].chunks(2) {
            buckets.push((bucket_value(&pair[0])?, bucket_value(&pair[1])?));
        }
    }

    let quantile = to_number(&args[0])?;
    if !(0.0..=1.0).contains(&quantile) {
        return Err("invalid value of quantile".to_string());
    }

    buckets.sort_by(|a, b| a.0.total_cmp(&b.0));

    // counts must not decrease along the bounds
    let mut running = 0.0_f64;
    for bucket in &mut buckets {
        running = running.max(bucket.1);
        bucket.1 = running;
    }

    let Some(&(last_bound, total)) = buckets.last() else {
        return Err("no input data for function".to_string());
    };
    if last_bound != f64::INFINITY {
        return Err("last bucket must be +Inf".to_string());
    }
    if buckets.len() < 2 {
        return Err("not enough buckets".to_string());
    }
    if total <= 0.0 {
        return Err("total count of buckets is zero".to_string());
    }

    let rank = quantile * total;
    let index = buckets
        .iter()
        .position(|&(_, count)| count >= rank)
        .unwrap_or(buckets.len() - 1);

    if index == buckets.len() - 1 {
        return finite(buckets[index - 1].0);
    }
    let (upper, count) = buckets[index];
    if index == 0 && upper <= 0.0 {
        return finite(upper);
    }
    let (lower, lower_count) = if index == 0 {
        (0.0, 0.0)
    } else {
        buckets[index - 1]
    };
    let width = count - lower_count;
    if width <= 0.0 {
        return finite(upper);
    }
    finite(lower + (upper - lower) * ((rank - lower_count) / width))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dbl(value: Result<Variant, String>) -> f64 {
        match value.unwrap() {
            Variant::Double(v) => v,
            other => panic!("expected double, got {:?}", other),
        }
    }

    fn vector(values: &[f64]) -> Vec<Variant> {
        vec![Variant::DoubleVector(values.to_vec())]
    }

    #[test]
    fn test_basic_aggregates() {
        let args = vector(&[4.0, 1.0, 3.0]);
        assert_eq!(dbl(aggregate(&args, Aggregate::Min)), 1.0);
        assert_eq!(dbl(aggregate(&args, Aggregate::Max)), 4.0);
        assert_eq!(dbl(aggregate(&args, Aggregate::Sum)), 8.0);
        assert_eq!(dbl(aggregate(&args, Aggregate::SumOfSquares)), 26.0);
        let scalars = [Variant::UInt64(2), Variant::from("4"), Variant::Double(6.0)];
        assert_eq!(dbl(aggregate(&scalars, Aggregate::Avg)), 4.0);
    }

    #[test]
    fn test_dispersion() {
        let args = vector(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(dbl(aggregate(&args, Aggregate::VarPop)), 4.0);
        assert_eq!(dbl(aggregate(&args, Aggregate::StddevPop)), 2.0);
        assert!((dbl(aggregate(&args, Aggregate::VarSamp)) - 32.0 / 7.0).abs() < 1e-12);
        assert_eq!(dbl(aggregate(&args, Aggregate::Mad)), 0.5);
        assert!(aggregate(&vector(&[1.0]), Aggregate::StddevSamp).is_err());
    }

    #[test]
    fn test_shape_statistics() {
        let symmetric = vector(&[1.0, 2.0, 3.0]);
        assert_eq!(dbl(aggregate(&symmetric, Aggregate::Skewness)), 0.0);
        assert!((dbl(aggregate(&symmetric, Aggregate::Kurtosis)) - 1.5).abs() < 1e-12);
        assert!(aggregate(&vector(&[3.0, 3.0]), Aggregate::Kurtosis).is_err());
    }

    #[test]
    fn test_count_with_operator() {
        let values = Variant::DoubleVector(vec![1.0, 5.0, 5.0, 10.0]);
        assert_eq!(count(&[values.clone()]).unwrap(), Variant::UInt64(4));
        assert_eq!(
            count(&[values.clone(), Variant::from("gt"), Variant::from("4")]).unwrap(),
            Variant::UInt64(3)
        );
        assert_eq!(
            count(&[values.clone(), Variant::None, Variant::from("5")]).unwrap(),
            Variant::UInt64(2)
        );
        assert_eq!(
            count(&[values.clone(), Variant::from("bitand"), Variant::from("0/1")]).unwrap(),
            Variant::UInt64(1)
        );
        assert!(count(&[values, Variant::from("regexp"), Variant::from("x")]).is_err());
        assert_eq!(
            count(&[Variant::UInt64(1), Variant::UInt64(2)]).unwrap(),
            Variant::UInt64(2)
        );
    }

    #[test]
    fn test_histogram_quantile_pairs() {
        let args = [
            Variant::Double(0.5),
            Variant::Double(1.0),
            Variant::Double(10.0),
            Variant::Double(2.0),
            Variant::Double(20.0),
            Variant::from("+Inf"),
            Variant::Double(20.0),
        ];
        // rank 10 lands on the upper edge of the first bucket
        assert_eq!(dbl(histogram_quantile(&args)), 1.0);

        let vector = [
            Variant::Double(0.75),
            Variant::DoubleVector(vec![1.0, 10.0, 2.0, 20.0, f64::INFINITY, 20.0]),
        ];
        assert_eq!(dbl(histogram_quantile(&vector)), 1.5);
    }

    #[test]
    fn test_histogram_quantile_validation() {
        let bad_bucket = [
            Variant::Double(0.5),
            Variant::from("huge"),
            Variant::Double(1.0),
        ];
        assert_eq!(
            histogram_quantile(&bad_bucket).unwrap_err(),
            "invalid string values of bucket"
        );
        let numeric_string = [
            Variant::Double(0.5),
            Variant::from("10"),
            Variant::Double(1.0),
            Variant::from("+Inf"),
            Variant::Double(1.0),
        ];
        assert_eq!(
            histogram_quantile(&numeric_string).unwrap_err(),
            "invalid string values of bucket"
        );
        let bad_quantile = [
            Variant::Double(1.5),
            Variant::from("inf"),
            Variant::Double(1.0),
        ];
        assert_eq!(
            histogram_quantile(&bad_quantile).unwrap_err(),
            "invalid value of quantile"
        );
    }
}
