use anyhow::Result;
use serde::Serialize;

use tally_core::models::{DailyTotals, Goal, MealEvent};

use crate::app::App;

use super::helpers::{meal_table, parse_date, progress_line};

#[derive(Serialize)]
struct DayReport {
    date: chrono::NaiveDate,
    meals: Vec<MealEvent>,
    totals: DailyTotals,
    goal: Option<Goal>,
}

pub(crate) fn cmd_today(app: &App, date: Option<&str>, json: bool) -> Result<()> {
    let user = app.require_session()?.user.id;
    let service = &app.service;
    let date = parse_date(date, service.boundary())?;
    let window = service.boundary().window(date);

    let meals = service.client().meals_in(&user, &window)?;
    let totals = service.totals_for(&user, date)?;
    let goal = service.goal_for(&user, date)?;

    if json {
        let report = DayReport {
            date,
            meals,
            totals,
            goal,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("=== {date} ===\n");
    if meals.is_empty() {
        println!("  No meals logged");
    } else {
        println!("{}", meal_table(&meals));
    }
    println!();
    println!("  Calories: {} kcal", totals.total_calories);
    println!("  Water:    {} ml", totals.total_water_ml);

    if let Some(goal) = &goal {
        println!();
        println!(
            "  Calorie goal: {}",
            progress_line(goal.calorie_progress, goal.calorie_goal, "kcal")
        );
        println!(
            "  Water goal:   {}",
            progress_line(goal.water_progress_ml, goal.water_goal_ml, "ml")
        );
        if goal.synced_at.is_none() && service.client().records_sync_time() {
            println!("  (progress not synced yet; run `tally goal sync`)");
        }
    }
    Ok(())
}
