//! Functions reading the evaluation timestamp.

use time::OffsetDateTime;

use super::CallEnv;
use crate::variant::Variant;

fn local_time(env: &CallEnv<'_>) -> Result<OffsetDateTime, String> {
    OffsetDateTime::from_unix_timestamp(env.ts.sec)
        .map(|t| t.to_offset(env.utc_offset))
        .map_err(|_| format!("cannot convert time \"{}\"", env.ts.sec))
}

/// `YYYYMMDD`
pub(crate) fn date(env: &CallEnv<'_>) -> Result<Variant, String> {
    let t = local_time(env)?;
    Ok(Variant::Str(format!(
        "{:04}{:02}{:02}",
        t.year(),
        u8::from(t.month()),
        t.day()
    )))
}

/// `HHMMSS`
pub(crate) fn time_of_day(env: &CallEnv<'_>) -> Result<Variant, String> {
    let t = local_time(env)?;
    Ok(Variant::Str(format!(
        "{:02}{:02}{:02}",
        t.hour(),
        t.minute(),
        t.second()
    )))
}

/// 1 for Monday through 7 for Sunday.
pub(crate) fn day_of_week(env: &CallEnv<'_>) -> Result<Variant, String> {
    let t = local_time(env)?;
    Ok(Variant::Str(t.weekday().number_from_monday().to_string()))
}

pub(crate) fn day_of_month(env: &CallEnv<'_>) -> Result<Variant, String> {
    let t = local_time(env)?;
    Ok(Variant::Str(t.day().to_string()))
}
