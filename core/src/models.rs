use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

pub const DEFAULT_CALORIE_GOAL: i64 = 2000;
pub const DEFAULT_WATER_GOAL_ML: i64 = 2500;
pub const QUICK_ADD_WATER_ML: &[i64] = &[250, 500, 750];
/// General guidance for adult daily water intake, shown as a hint next to the tracker.
pub const RECOMMENDED_WATER_RANGE_ML: (i64, i64) = (2000, 3000);

const MAX_FOOD_NAME_CHARS: usize = 200;

/// The three logical tables of the Data Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Meals,
    WaterIntake,
    Goals,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Meals, Table::WaterIntake, Table::Goals];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Meals => "meals",
            Self::WaterIntake => "water_intake",
            Self::Goals => "goals",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MealEvent {
    pub id: String,
    pub user_id: String,
    pub food_name: String,
    pub calories: i64,
    pub meal_time: NaiveTime,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterEvent {
    pub id: String,
    pub user_id: String,
    pub amount_ml: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub calorie_goal: i64,
    pub water_goal_ml: i64,
    pub calorie_progress: i64,
    pub water_progress_ml: i64,
    /// Absent on stores whose `goals` table has no such column.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// When progress was last copied from the day's events. `None` until the first sync,
    /// and always `None` on stores that do not record it.
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMeal {
    pub food_name: String,
    pub calories: i64,
    pub meal_time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGoal {
    pub date: NaiveDate,
    pub calorie_goal: i64,
    pub water_goal_ml: i64,
}

/// Sums over one day's event rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTotals {
    pub total_calories: i64,
    pub total_water_ml: i64,
}

// --- Validation (runs before any store call) ---

pub fn validate_food_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TrackerError::Validation(
            "Food name must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_FOOD_NAME_CHARS {
        return Err(TrackerError::Validation(format!(
            "Food name must be at most {MAX_FOOD_NAME_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn validate_calories(calories: i64) -> Result<i64> {
    if calories <= 0 {
        return Err(TrackerError::Validation(format!(
            "Calories must be greater than 0 (got {calories})"
        )));
    }
    Ok(calories)
}

pub fn validate_water_amount(amount_ml: i64) -> Result<i64> {
    if amount_ml <= 0 {
        return Err(TrackerError::Validation(format!(
            "Water amount must be greater than 0 ml (got {amount_ml})"
        )));
    }
    Ok(amount_ml)
}

pub fn validate_goal_targets(calorie_goal: i64, water_goal_ml: i64) -> Result<()> {
    if calorie_goal <= 0 {
        return Err(TrackerError::Validation(
            "Calorie goal must be greater than 0".to_string(),
        ));
    }
    if water_goal_ml <= 0 {
        return Err(TrackerError::Validation(
            "Water goal must be greater than 0 ml".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_progress(calorie_progress: i64, water_progress_ml: i64) -> Result<()> {
    if calorie_progress < 0 || water_progress_ml < 0 {
        return Err(TrackerError::Validation(
            "Progress values must be non-negative".to_string(),
        ));
    }
    Ok(())
}

impl NewMeal {
    /// Validate and normalize a meal draft: trims the name, rejects non-positive calories.
    pub fn validated(food_name: &str, calories: i64, meal_time: NaiveTime) -> Result<Self> {
        Ok(Self {
            food_name: validate_food_name(food_name)?,
            calories: validate_calories(calories)?,
            meal_time,
        })
    }
}

impl NewGoal {
    pub fn validated(date: NaiveDate, calorie_goal: i64, water_goal_ml: i64) -> Result<Self> {
        validate_goal_targets(calorie_goal, water_goal_ml)?;
        Ok(Self {
            date,
            calorie_goal,
            water_goal_ml,
        })
    }
}

/// Parse a wall-clock time of day: "HH:MM" or "HH:MM:SS".
pub fn parse_meal_time(s: &str) -> Result<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| TrackerError::Validation(format!("Invalid time '{s}'. Use HH:MM")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        assert_eq!(Table::Meals.as_str(), "meals");
        assert_eq!(Table::WaterIntake.to_string(), "water_intake");
        assert_eq!(Table::Goals.as_str(), "goals");
    }

    #[test]
    fn test_validate_food_name() {
        assert_eq!(validate_food_name("  Eggs ").unwrap(), "Eggs");
        assert!(validate_food_name("   ").unwrap_err().is_validation());
        assert!(validate_food_name(&"x".repeat(201)).is_err());
    }

    #[test]
    fn test_validate_calories_and_water() {
        assert_eq!(validate_calories(78).unwrap(), 78);
        assert!(validate_calories(0).is_err());
        assert!(validate_calories(-5).is_err());
        assert_eq!(validate_water_amount(250).unwrap(), 250);
        assert!(validate_water_amount(0).unwrap_err().is_validation());
        assert!(validate_water_amount(-250).is_err());
    }

    #[test]
    fn test_validate_goal_targets() {
        assert!(validate_goal_targets(2000, 2500).is_ok());
        assert!(validate_goal_targets(0, 2500).is_err());
        assert!(validate_goal_targets(2000, 0).is_err());
    }

    #[test]
    fn test_validate_progress() {
        assert!(validate_progress(0, 0).is_ok());
        assert!(validate_progress(-1, 0).is_err());
        assert!(validate_progress(0, -1).is_err());
    }

    #[test]
    fn test_new_meal_validated_trims() {
        let t = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let meal = NewMeal::validated(" Toast ", 69, t).unwrap();
        assert_eq!(meal.food_name, "Toast");
        assert!(NewMeal::validated("Toast", 0, t).is_err());
    }

    #[test]
    fn test_parse_meal_time() {
        assert_eq!(
            parse_meal_time("08:30").unwrap(),
            NaiveTime::from_hms_opt(8, 30, 0).unwrap()
        );
        assert_eq!(
            parse_meal_time("23:59:10").unwrap(),
            NaiveTime::from_hms_opt(23, 59, 10).unwrap()
        );
        assert!(parse_meal_time("25:00").is_err());
        assert!(parse_meal_time("noon").is_err());
    }

    #[test]
    fn test_goal_deserializes_without_synced_at() {
        let goal: Goal = serde_json::from_value(serde_json::json!({
            "id": "g1",
            "user_id": "u1",
            "date": "2024-06-15",
            "calorie_goal": 2000,
            "water_goal_ml": 2500,
            "calorie_progress": 0,
            "water_progress_ml": 0,
            "created_at": "2024-06-15T07:00:00Z"
        }))
        .unwrap();
        assert!(goal.synced_at.is_none());
        assert_eq!(goal.date, NaiveDate::from_ymd_opt(2024, 6, 15).unwrap());
    }

    #[test]
    fn test_goal_deserializes_from_seven_column_row() {
        let goal: Goal = serde_json::from_value(serde_json::json!({
            "id": "g1",
            "user_id": "u1",
            "date": "2024-06-15",
            "calorie_goal": 2000,
            "water_goal_ml": 2500,
            "calorie_progress": 147,
            "water_progress_ml": 750
        }))
        .unwrap();
        assert!(goal.created_at.is_none());
        assert!(goal.synced_at.is_none());
        assert_eq!(goal.calorie_progress, 147);
    }
}
