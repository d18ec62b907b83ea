use anyhow::{Result, bail};

use tally_core::lookup::known_foods;

use crate::app::App;

use super::helpers::parse_time;

/// Log a meal. Without `--calories` the built-in calorie table is consulted.
pub(crate) fn cmd_meal(
    app: &App,
    food: &str,
    calories: Option<i64>,
    time: Option<&str>,
    json: bool,
) -> Result<()> {
    let user = app.require_session()?.user.id;
    let meal_time = parse_time(time)?;
    let calories = match calories {
        Some(c) => c,
        None => match app.service.lookup_calories(food) {
            Ok(c) => {
                eprintln!("Using {c} kcal for '{}' from the calorie table", food.trim());
                i64::from(c)
            }
            Err(_) => bail!(
                "No calorie entry for '{}'. Pass --calories, or use one of: {}",
                food.trim(),
                known_foods().join(", ")
            ),
        },
    };

    let meal = app.service.add_meal(&user, food, calories, meal_time)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&meal)?);
    } else {
        println!(
            "Logged {} ({} kcal) at {}",
            meal.food_name,
            meal.calories,
            meal.meal_time.format("%H:%M")
        );
    }
    Ok(())
}
