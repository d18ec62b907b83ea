use anyhow::Result;
use std::process;

use tally_core::lookup::{known_foods, known_symptoms};

use crate::app::App;

use super::helpers::json_error;

pub(crate) fn cmd_calories(app: &App, food: &str, json: bool) -> Result<()> {
    match app.service.lookup_calories(food) {
        Ok(calories) => {
            if json {
                let out = serde_json::json!({ "food": food.trim(), "calories": calories });
                println!("{out}");
            } else {
                println!("{}: {calories} kcal", food.trim());
            }
            Ok(())
        }
        Err(e) => {
            if json {
                println!("{}", json_error(&e.to_string()));
            } else {
                eprintln!("{e}");
                eprintln!("Known foods: {}", known_foods().join(", "));
            }
            process::exit(2);
        }
    }
}

pub(crate) fn cmd_recommend(app: &App, symptom: &str, json: bool) -> Result<()> {
    match app.service.recommend(symptom) {
        Ok(foods) => {
            if json {
                let foods: Vec<&str> = foods.split(", ").collect();
                let out = serde_json::json!({ "symptom": symptom.trim(), "foods": foods });
                println!("{out}");
            } else {
                println!("For {}: {foods}", symptom.trim());
            }
            Ok(())
        }
        Err(e) => {
            if json {
                println!("{}", json_error(&e.to_string()));
            } else {
                eprintln!("{e}");
                eprintln!("Try one of: {}", known_symptoms().join(", "));
            }
            process::exit(2);
        }
    }
}
