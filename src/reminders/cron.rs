// src/reminders/cron.rs
// Five-field cron expressions (minute hour day-of-month month day-of-week),
// evaluated in UTC. Supported syntax per field: `*`, `N`, `N-M`, `*/N`, and
// comma lists of those. Parsing is total: an invalid expression yields None
// and simply never matches.

use chrono::{DateTime, Datelike, Timelike, Utc};

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Any,
    Value(u32),
    Range(u32, u32),
    /// `*/N` matches when value % N == 0. Note this makes `*/2` in the
    /// hour field mean "even hours", not "every second hour from start".
    Step(u32),
}

#[derive(Debug, Clone, PartialEq)]
struct Field {
    parts: Vec<Part>,
}

impl Field {
    fn matches(&self, value: u32) -> bool {
        self.parts.iter().any(|part| match part {
            Part::Any => true,
            Part::Value(v) => *v == value,
            Part::Range(lo, hi) => (*lo..=*hi).contains(&value),
            Part::Step(n) => value % n == 0,
        })
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CronExpr {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronExpr {
    /// Parse a 5-field expression. Returns None on any syntax or bounds
    /// violation.
    pub fn parse(expression: &str) -> Option<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return None;
        }
        Some(Self {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day_of_month: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            day_of_week: parse_field(fields[4], 0, 7)?,
        })
    }

    /// Whether the expression matches the given UTC instant's minute.
    /// All five fields must match.
    pub fn matches(&self, at: &DateTime<Utc>) -> bool {
        // Cron day-of-week is 0..=6 with Sunday = 0 (7 also accepted as
        // Sunday at parse time).
        let dow = at.weekday().num_days_from_sunday();
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day_of_month.matches(at.day())
            && self.month.matches(at.month())
            && (self.day_of_week.matches(dow) || (dow == 0 && self.day_of_week.matches(7)))
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Option<Field> {
    let mut parts = Vec::new();
    for element in field.split(',') {
        parts.push(parse_part(element, min, max)?);
    }
    if parts.is_empty() {
        return None;
    }
    Some(Field { parts })
}

fn parse_part(element: &str, min: u32, max: u32) -> Option<Part> {
    if element == "*" {
        return Some(Part::Any);
    }
    if let Some(step) = element.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some(Part::Step(n));
    }
    if let Some((lo, hi)) = element.split_once('-') {
        let lo: u32 = lo.parse().ok()?;
        let hi: u32 = hi.parse().ok()?;
        if lo > hi || lo < min || hi > max {
            return None;
        }
        return Some(Part::Range(lo, hi));
    }
    let value: u32 = element.parse().ok()?;
    if value < min || value > max {
        return None;
    }
    Some(Part::Value(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_wildcard_matches_everything() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        assert!(expr.matches(&at(2026, 8, 1, 0, 0)));
        assert!(expr.matches(&at(2026, 12, 31, 23, 59)));
    }

    #[test]
    fn test_fixed_time() {
        let expr = CronExpr::parse("0 9 * * *").unwrap();
        assert!(expr.matches(&at(2026, 8, 1, 9, 0)));
        assert!(!expr.matches(&at(2026, 8, 1, 9, 1)));
        assert!(!expr.matches(&at(2026, 8, 1, 10, 0)));
    }

    #[test]
    fn test_range() {
        let expr = CronExpr::parse("0 9-17 * * *").unwrap();
        assert!(expr.matches(&at(2026, 8, 1, 9, 0)));
        assert!(expr.matches(&at(2026, 8, 1, 17, 0)));
        assert!(!expr.matches(&at(2026, 8, 1, 18, 0)));
    }

    #[test]
    fn test_step_is_modulo() {
        let expr = CronExpr::parse("0 */2 * * *").unwrap();
        assert!(expr.matches(&at(2026, 8, 1, 0, 0)));
        assert!(expr.matches(&at(2026, 8, 1, 14, 0)));
        assert!(!expr.matches(&at(2026, 8, 1, 13, 0)));
    }

    #[test]
    fn test_comma_list_mixed_forms() {
        let expr = CronExpr::parse("0,30 9,12-14 * * *").unwrap();
        assert!(expr.matches(&at(2026, 8, 1, 9, 30)));
        assert!(expr.matches(&at(2026, 8, 1, 13, 0)));
        assert!(!expr.matches(&at(2026, 8, 1, 11, 0)));
        assert!(!expr.matches(&at(2026, 8, 1, 9, 15)));
    }

    #[test]
    fn test_day_of_week() {
        // 2026-08-01 is a Saturday (dow 6); 2026-08-02 a Sunday (dow 0).
        let expr = CronExpr::parse("0 9 * * 6").unwrap();
        assert!(expr.matches(&at(2026, 8, 1, 9, 0)));
        assert!(!expr.matches(&at(2026, 8, 2, 9, 0)));

        // Both 0 and 7 mean Sunday.
        let sunday = CronExpr::parse("0 9 * * 7").unwrap();
        assert!(sunday.matches(&at(2026, 8, 2, 9, 0)));
        let sunday0 = CronExpr::parse("0 9 * * 0").unwrap();
        assert!(sunday0.matches(&at(2026, 8, 2, 9, 0)));
    }

    #[test]
    fn test_all_fields_must_match() {
        let expr = CronExpr::parse("30 6 15 3 *").unwrap();
        assert!(expr.matches(&at(2026, 3, 15, 6, 30)));
        assert!(!expr.matches(&at(2026, 4, 15, 6, 30)));
        assert!(!expr.matches(&at(2026, 3, 16, 6, 30)));
    }

    #[test]
    fn test_invalid_expressions_rejected() {
        assert!(CronExpr::parse("").is_none());
        assert!(CronExpr::parse("* * * *").is_none());
        assert!(CronExpr::parse("* * * * * *").is_none());
        assert!(CronExpr::parse("60 * * * *").is_none());
        assert!(CronExpr::parse("* 24 * * *").is_none());
        assert!(CronExpr::parse("* * 0 * *").is_none());
        assert!(CronExpr::parse("* * * 13 *").is_none());
        assert!(CronExpr::parse("* * * * 8").is_none());
        assert!(CronExpr::parse("*/0 * * * *").is_none());
        assert!(CronExpr::parse("9-5 * * * *").is_none());
        assert!(CronExpr::parse("a * * * *").is_none());
    }
}
