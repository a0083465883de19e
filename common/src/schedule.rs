// Schedule parsing and next fire time calculation
//
// Jobs carry classic five-field cron expressions
// (`minute hour day-of-month month day-of-week`) or the `manual`/empty
// sentinel. The `cron` crate works with a leading seconds field and numbers
// days of the week 1-7 from Sunday, so expressions are normalised before
// being handed to it.

use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Token that marks a job as run-on-demand only
pub const MANUAL_SCHEDULE: &str = "manual";

const FIELD_COUNT: usize = 5;

/// A parsed job schedule
#[derive(Debug, Clone)]
pub enum ScheduleExpression {
    /// No automatic trigger; the job only runs on demand
    Manual,
    /// A recurring cron rule
    Recurring(CronRule),
}

impl ScheduleExpression {
    /// Parse a job's schedule string
    pub fn parse(raw: &str) -> Result<Self, ScheduleError> {
        let trimmed = raw.trim();
        if is_manual(trimmed) {
            return Ok(ScheduleExpression::Manual);
        }
        CronRule::parse(trimmed).map(ScheduleExpression::Recurring)
    }
}

/// Returns true for the schedules that never fire automatically
pub fn is_manual(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case(MANUAL_SCHEDULE)
}

/// A validated five-field cron rule.
///
/// When both day-of-month and day-of-week are restricted a day matches if
/// either field does, as in classic cron. The `cron` crate requires both, so
/// such rules are kept as two schedules, one per day field.
#[derive(Clone)]
pub struct CronRule {
    expression: String,
    schedules: Vec<CronSchedule>,
}

impl CronRule {
    /// Parse and validate a five-field cron expression or an `@` macro
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let expression = expression.trim();
        let expanded = expand_macro(expression).unwrap_or(expression);

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != FIELD_COUNT {
            return Err(ScheduleError::WrongFieldCount {
                expression: expression.to_string(),
                found: fields.len(),
            });
        }

        let day_of_week = translate_day_of_week(fields[4]).map_err(|reason| {
            ScheduleError::InvalidCronExpression {
                expression: expression.to_string(),
                reason,
            }
        })?;

        let day_pairs = if is_restricted(fields[2]) && is_restricted(fields[4]) {
            vec![(fields[2], "*"), ("*", day_of_week.as_str())]
        } else {
            vec![(fields[2], day_of_week.as_str())]
        };

        let schedules = day_pairs
            .into_iter()
            .map(|(day_of_month, day_of_week)| {
                // Seconds are pinned to zero
                let normalized = format!(
                    "0 {} {} {} {} {}",
                    fields[0], fields[1], day_of_month, fields[3], day_of_week
                );
                CronSchedule::from_str(&normalized).map_err(|e| {
                    ScheduleError::InvalidCronExpression {
                        expression: expression.to_string(),
                        reason: e.to_string(),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            expression: expression.to_string(),
            schedules,
        })
    }

    /// The expression as written by the operator
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First occurrence strictly after `after`, evaluated in `timezone`
    pub fn next_after(&self, after: DateTime<Utc>, timezone: Tz) -> Option<DateTime<Utc>> {
        let reference = after.with_timezone(&timezone);
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&reference).next())
            .map(|next| next.with_timezone(&Utc))
            .min()
    }
}

impl fmt::Debug for CronRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronRule")
            .field("expression", &self.expression)
            .finish()
    }
}

impl fmt::Display for CronRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    Tz::from_str(name.trim()).map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// Timezone used when none is configured
pub fn default_timezone() -> Tz {
    chrono_tz::UTC
}

fn expand_macro(expression: &str) -> Option<&'static str> {
    let expanded = match expression.to_ascii_lowercase().as_str() {
        "@hourly" => "0 * * * *",
        "@daily" | "@midnight" => "0 0 * * *",
        "@weekly" => "0 0 * * 0",
        "@monthly" => "0 0 1 * *",
        "@yearly" | "@annually" => "0 0 1 1 *",
        _ => return None,
    };
    Some(expanded)
}

/// Rewrite a classic day-of-week field (0-7, Sunday = 0 or 7) into the
/// 1-7 numbering the `cron` crate expects. Day names (`MON`) may be mixed
/// with numbers, as in `MON-5`.
fn translate_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        if item.is_empty() {
            return Err(format!("empty list item in day-of-week field '{}'", field));
        }
        days.extend(expand_days(item)?);
    }

    Ok(days
        .iter()
        .map(|day| day.to_string())
        .collect::<Vec<_>>()
        .join(","))
}

fn expand_days(item: &str) -> Result<BTreeSet<u32>, String> {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => {
            let step: u32 = step
                .parse()
                .map_err(|_| format!("invalid step '{}' in day-of-week", step))?;
            if step == 0 {
                return Err("day-of-week step must be greater than 0".to_string());
            }
            (base, Some(step))
        }
        None => (item, None),
    };

    let (start, end) = if base == "*" {
        (0, 6)
    } else if let Some((start, end)) = base.split_once('-') {
        (parse_day(start)?, parse_day(end)?)
    } else {
        let day = parse_day(base)?;
        // `a/n` means from `a` through the end of the week
        if step.is_some() {
            (day, 6)
        } else {
            (day, day)
        }
    };

    if start > end {
        return Err(format!("day-of-week range '{}' is reversed", base));
    }

    let step = step.unwrap_or(1) as usize;
    Ok((start..=end)
        .step_by(step)
        .map(|day| day % 7 + 1)
        .collect())
}

/// A day field that starts with `*` or `?` places no restriction
fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field.starts_with('?'))
}

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

fn parse_day(raw: &str) -> Result<u32, String> {
    if let Some(day) = DAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(raw))
    {
        return Ok(day as u32);
    }

    let day: u32 = raw
        .parse()
        .map_err(|_| format!("invalid day-of-week value '{}'", raw))?;
    if day > 7 {
        return Err(format!("day-of-week value {} is out of range 0-7", day));
    }
    Ok(day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_manual_sentinels() {
        assert!(matches!(
            ScheduleExpression::parse("manual").unwrap(),
            ScheduleExpression::Manual
        ));
        assert!(matches!(
            ScheduleExpression::parse("").unwrap(),
            ScheduleExpression::Manual
        ));
        assert!(matches!(
            ScheduleExpression::parse("  MANUAL ").unwrap(),
            ScheduleExpression::Manual
        ));
    }

    #[test]
    fn test_parse_valid_five_field_expression() {
        let rule = CronRule::parse("*/15 2 * * 1-5").unwrap();
        assert_eq!(rule.expression(), "*/15 2 * * 1-5");
    }

    #[test]
    fn test_parse_invalid_expression() {
        let err = ScheduleExpression::parse("not-a-cron").unwrap_err();
        assert!(matches!(err, ScheduleError::WrongFieldCount { found: 1, .. }));

        let err = CronRule::parse("61 * * * *").unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCronExpression { .. }));
    }

    #[test]
    fn test_six_field_expression_rejected() {
        let err = CronRule::parse("0 0 12 * * *").unwrap_err();
        assert!(matches!(err, ScheduleError::WrongFieldCount { found: 6, .. }));
    }

    #[test]
    fn test_day_of_week_out_of_range() {
        assert!(CronRule::parse("0 0 * * 8").is_err());
        assert!(CronRule::parse("0 0 * * 5-2").is_err());
        assert!(CronRule::parse("0 0 * * */0").is_err());
    }

    #[test]
    fn test_translate_day_of_week() {
        assert_eq!(translate_day_of_week("*").unwrap(), "*");
        assert_eq!(translate_day_of_week("0").unwrap(), "1");
        assert_eq!(translate_day_of_week("7").unwrap(), "1");
        assert_eq!(translate_day_of_week("1-5").unwrap(), "2,3,4,5,6");
        assert_eq!(translate_day_of_week("*/2").unwrap(), "1,3,5,7");
        assert_eq!(translate_day_of_week("MON-FRI").unwrap(), "2,3,4,5,6");
        assert_eq!(translate_day_of_week("mon-5").unwrap(), "2,3,4,5,6");
        assert_eq!(translate_day_of_week("SAT,0").unwrap(), "1,7");
        assert!(translate_day_of_week("FUNDAY").is_err());
    }

    #[test]
    fn test_every_minute_next_after() {
        let rule = CronRule::parse("* * * * *").unwrap();
        let next = rule.next_after(at(2024, 3, 1, 10, 30), chrono_tz::UTC).unwrap();
        assert_eq!(next, at(2024, 3, 1, 10, 31));
    }

    #[test]
    fn test_sunday_as_zero() {
        let rule = CronRule::parse("0 0 * * 0").unwrap();
        // 2024-03-01 is a Friday
        let next = rule.next_after(at(2024, 3, 1, 12, 0), chrono_tz::UTC).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
        assert_eq!(next, at(2024, 3, 3, 0, 0));
    }

    #[test]
    fn test_weekday_range() {
        let rule = CronRule::parse("30 9 * * 1-5").unwrap();
        // Saturday morning rolls to Monday
        let next = rule.next_after(at(2024, 3, 2, 8, 0), chrono_tz::UTC).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!((next.hour(), next.minute()), (9, 30));
    }

    #[test]
    fn test_mixed_name_and_number_day_range() {
        let rule = CronRule::parse("0 9 * * MON-5").unwrap();
        // Saturday rolls to Monday
        let next = rule.next_after(at(2024, 3, 2, 12, 0), chrono_tz::UTC).unwrap();
        assert_eq!(next, at(2024, 3, 4, 9, 0));
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        // The 1st of the month or any Monday
        let rule = CronRule::parse("0 0 1 * 1").unwrap();
        let tz = chrono_tz::UTC;

        let next = rule.next_after(at(2024, 3, 2, 12, 0), tz).unwrap();
        assert_eq!(next, at(2024, 3, 4, 0, 0));

        // 2024-03-25 is a Monday, 2024-04-01 is both
        let next = rule.next_after(at(2024, 3, 25, 12, 0), tz).unwrap();
        assert_eq!(next, at(2024, 4, 1, 0, 0));

        // 2024-05-01 is a Wednesday
        let next = rule.next_after(at(2024, 4, 29, 12, 0), tz).unwrap();
        assert_eq!(next, at(2024, 5, 1, 0, 0));
    }

    #[test]
    fn test_starred_day_field_keeps_single_schedule() {
        let rule = CronRule::parse("0 0 */2 * 1").unwrap();
        assert_eq!(rule.schedules.len(), 1);
        let rule = CronRule::parse("0 0 1,15 * 1").unwrap();
        assert_eq!(rule.schedules.len(), 2);
    }

    #[test]
    fn test_macros_expand() {
        let rule = CronRule::parse("@daily").unwrap();
        assert_eq!(rule.expression(), "@daily");
        let next = rule.next_after(at(2024, 3, 1, 12, 0), chrono_tz::UTC).unwrap();
        assert_eq!(next, at(2024, 3, 2, 0, 0));

        let weekly = CronRule::parse("@weekly").unwrap();
        let next = weekly.next_after(at(2024, 3, 1, 12, 0), chrono_tz::UTC).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
    }

    #[test]
    fn test_timezone_evaluation() {
        let rule = CronRule::parse("0 2 * * *").unwrap();
        let tz = parse_timezone("Europe/Berlin").unwrap();
        // Winter time, UTC+1
        let next = rule.next_after(at(2024, 1, 15, 12, 0), tz).unwrap();
        assert_eq!(next, at(2024, 1, 16, 1, 0));
    }

    #[test]
    fn test_parse_timezone_rejects_unknown() {
        assert!(parse_timezone("Mars/Olympus").is_err());
        assert_eq!(default_timezone().to_string(), "UTC");
    }
}
