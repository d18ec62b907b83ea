use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use tally_core::models::{MealEvent, parse_meal_time};
use tally_core::views::percent;
use tally_core::window::DayBoundary;

pub(crate) fn parse_date(date_str: Option<&str>, boundary: DayBoundary) -> Result<NaiveDate> {
    let today = boundary.today();
    match date_str {
        None | Some("today") => Ok(today),
        Some("yesterday") => Ok(today - chrono::Duration::days(1)),
        Some("tomorrow") => Ok(today + chrono::Duration::days(1)),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| {
            format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
        }),
    }
}

pub(crate) fn parse_time(time_str: Option<&str>) -> Result<Option<NaiveTime>> {
    Ok(time_str.map(parse_meal_time).transpose()?)
}

/// Read one line from stdin after printing `label` to stderr.
pub(crate) fn prompt(label: &str) -> Result<String> {
    eprint!("{label}: ");
    io::stderr().flush()?;
    let stdin = io::stdin();
    let line = stdin.lock().lines().next().context("No input")??;
    Ok(line.trim().to_string())
}

pub(crate) fn password_or_prompt(password: Option<String>) -> Result<String> {
    match password {
        Some(p) => Ok(p),
        None => {
            let p = prompt("Password")?;
            if p.is_empty() {
                bail!("Password is required");
            }
            Ok(p)
        }
    }
}

pub(crate) fn meal_table(meals: &[MealEvent]) -> String {
    #[derive(Tabled)]
    struct MealRow {
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "Food")]
        food: String,
        #[tabled(rename = "kcal")]
        calories: i64,
    }

    let rows: Vec<MealRow> = meals
        .iter()
        .map(|m| MealRow {
            time: m.meal_time.format("%H:%M").to_string(),
            food: truncate(&m.food_name, 35),
            calories: m.calories,
        })
        .collect();

    Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
        .to_string()
}

/// "1234 / 2000 kcal (61.7%)", or without the percentage when the goal is 0.
pub(crate) fn progress_line(progress: i64, goal: i64, unit: &str) -> String {
    match percent(progress, goal) {
        Some(p) => format!("{progress} / {goal} {unit} ({p:.1}%)"),
        None => format!("{progress} / {goal} {unit}"),
    }
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_none() {
        assert_eq!(
            parse_date(None, DayBoundary::Utc).unwrap(),
            DayBoundary::Utc.today()
        );
    }

    #[test]
    fn test_parse_date_keywords() {
        let today = DayBoundary::Local.today();
        assert_eq!(parse_date(Some("today"), DayBoundary::Local).unwrap(), today);
        assert_eq!(
            parse_date(Some("yesterday"), DayBoundary::Local).unwrap(),
            today - chrono::Duration::days(1)
        );
        assert_eq!(
            parse_date(Some("tomorrow"), DayBoundary::Local).unwrap(),
            today + chrono::Duration::days(1)
        );
    }

    #[test]
    fn test_parse_date_iso() {
        let date = parse_date(Some("2024-01-15"), DayBoundary::Utc).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date(Some("nope"), DayBoundary::Utc).is_err());
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time(None).unwrap(), None);
        assert_eq!(
            parse_time(Some("08:30")).unwrap(),
            NaiveTime::from_hms_opt(8, 30, 0)
        );
        assert!(parse_time(Some("breakfast")).is_err());
    }

    #[test]
    fn test_progress_line() {
        assert_eq!(progress_line(500, 2000, "kcal"), "500 / 2000 kcal (25.0%)");
        assert_eq!(progress_line(500, 0, "ml"), "500 / 0 ml");
    }

    #[test]
    fn test_json_error_escapes() {
        assert_eq!(json_error("no \"x\""), r#"{"error":"no \"x\""}"#);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world this is long", 10), "hello w...");
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
        assert_eq!(truncate("日清カップヌードル", 8), "日清カップ...");
    }
}
