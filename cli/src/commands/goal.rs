use anyhow::Result;
use std::process;

use tally_core::models::Goal;

use crate::app::App;

use super::helpers::{parse_date, progress_line};

fn print_goal(goal: &Goal, tracks_sync_time: bool) {
    println!("Goals for {}", goal.date);
    println!(
        "  Calories: {}",
        progress_line(goal.calorie_progress, goal.calorie_goal, "kcal")
    );
    println!(
        "  Water:    {}",
        progress_line(goal.water_progress_ml, goal.water_goal_ml, "ml")
    );
    match goal.synced_at {
        Some(at) => println!("  Synced {}", at.format("%Y-%m-%d %H:%M UTC")),
        None if tracks_sync_time => println!("  Not synced yet"),
        None => {}
    }
}

pub(crate) fn cmd_goal_set(
    app: &App,
    calories: i64,
    water_ml: i64,
    date: Option<&str>,
    json: bool,
) -> Result<()> {
    let user = app.require_session()?.user.id;
    let date = parse_date(date, app.service.boundary())?;
    let goal = app.service.set_goals(&user, date, calories, water_ml)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&goal)?);
    } else {
        print_goal(&goal, app.service.client().records_sync_time());
    }
    Ok(())
}

pub(crate) fn cmd_goal_show(app: &App, date: Option<&str>, json: bool) -> Result<()> {
    let user = app.require_session()?.user.id;
    let date = parse_date(date, app.service.boundary())?;
    let goal = app.service.goal_for(&user, date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&goal)?);
        return Ok(());
    }
    match goal {
        Some(goal) => print_goal(&goal, app.service.client().records_sync_time()),
        None => {
            eprintln!("No goals set for {date}. Use `tally goal set <calories> <water_ml>`.");
            process::exit(2);
        }
    }
    Ok(())
}

pub(crate) fn cmd_goal_sync(app: &App, date: Option<&str>, json: bool) -> Result<()> {
    let user = app.require_session()?.user.id;
    let date = parse_date(date, app.service.boundary())?;
    let goal = app.service.sync_goal(&user, date)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&goal)?);
    } else {
        print_goal(&goal, app.service.client().records_sync_time());
    }
    Ok(())
}
