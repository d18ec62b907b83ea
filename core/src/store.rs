use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{Result, TrackerError};
use crate::models::{
    Goal, MealEvent, NewGoal, NewMeal, Table, WaterEvent, validate_progress,
    validate_water_amount,
};
use crate::notify::{ChangeCallback, Subscription};
use crate::window::DayWindow;

/// Row storage behind the tracker: the local SQLite database or a hosted PostgREST backend.
///
/// Rows travel as JSON objects keyed by column name. Stores assign `id` and `created_at`
/// on insert when the row does not carry them, enforce table constraints (including the
/// per-user-per-day uniqueness of goals), and publish a change event for every row written.
pub trait DataStore: Send + Sync {
    fn insert(&self, table: Table, row: Value) -> Result<Value>;
    fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>>;
    fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value>;
    fn subscribe(&self, table: Table, on_change: ChangeCallback) -> Subscription;

    /// Whether goal rows carry a `synced_at` column. The hosted schema has none, so progress
    /// updates there leave it out.
    fn records_sync_time(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
    Lt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A conjunction of column predicates with an optional ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn filter(mut self, column: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Eq, value)
    }

    #[must_use]
    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gte, value)
    }

    #[must_use]
    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lt, value)
    }

    #[must_use]
    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Canonical text form of stored timestamps. Fixed width, so text order is time order.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[must_use]
pub fn format_time_of_day(t: NaiveTime) -> String {
    t.format("%H:%M:%S").to_string()
}

fn decode<T: DeserializeOwned>(row: Value) -> Result<T> {
    Ok(serde_json::from_value(row)?)
}

fn decode_all<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter().map(decode).collect()
}

fn require_user(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(TrackerError::Auth("no signed-in user".to_string()));
    }
    Ok(())
}

/// Typed accessors over a [`DataStore`].
///
/// Input is validated here, before the store is called, so invalid input never costs a
/// round trip. Store failures are returned unchanged.
#[derive(Clone)]
pub struct EventStoreClient {
    store: Arc<dyn DataStore>,
}

impl EventStoreClient {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    pub fn append_meal(
        &self,
        user_id: &str,
        food_name: &str,
        calories: i64,
        meal_time: NaiveTime,
    ) -> Result<MealEvent> {
        require_user(user_id)?;
        let meal = NewMeal::validated(food_name, calories, meal_time)?;
        let row = self.store.insert(
            Table::Meals,
            json!({
                "user_id": user_id,
                "food_name": meal.food_name,
                "calories": meal.calories,
                "meal_time": format_time_of_day(meal.meal_time),
            }),
        )?;
        decode(row)
    }

    pub fn append_water(&self, user_id: &str, amount_ml: i64) -> Result<WaterEvent> {
        require_user(user_id)?;
        let amount_ml = validate_water_amount(amount_ml)?;
        let row = self.store.insert(
            Table::WaterIntake,
            json!({
                "user_id": user_id,
                "amount_ml": amount_ml,
            }),
        )?;
        decode(row)
    }

    /// Raw rows of `table` belonging to `user_id` inside `window`. Event tables are filtered
    /// on `created_at`; goals on their `date`.
    pub fn query_window(&self, user_id: &str, table: Table, window: &DayWindow) -> Result<Vec<Value>> {
        require_user(user_id)?;
        let query = match table {
            Table::Meals => Query::new()
                .eq("user_id", user_id)
                .gte("created_at", format_timestamp(window.start()))
                .lt("created_at", format_timestamp(window.end()))
                .order_by("meal_time", true),
            Table::WaterIntake => Query::new()
                .eq("user_id", user_id)
                .gte("created_at", format_timestamp(window.start()))
                .lt("created_at", format_timestamp(window.end()))
                .order_by("created_at", true),
            Table::Goals => Query::new()
                .eq("user_id", user_id)
                .eq("date", window.date().format("%Y-%m-%d").to_string()),
        };
        self.store.select(table, &query)
    }

    /// Meals in the window, earliest meal time first.
    pub fn meals_in(&self, user_id: &str, window: &DayWindow) -> Result<Vec<MealEvent>> {
        decode_all(self.query_window(user_id, Table::Meals, window)?)
    }

    pub fn water_in(&self, user_id: &str, window: &DayWindow) -> Result<Vec<WaterEvent>> {
        decode_all(self.query_window(user_id, Table::WaterIntake, window)?)
    }

    pub fn goal_for(&self, user_id: &str, date: NaiveDate) -> Result<Option<Goal>> {
        require_user(user_id)?;
        let query = Query::new()
            .eq("user_id", user_id)
            .eq("date", date.format("%Y-%m-%d").to_string())
            .limit(1);
        let rows = self.store.select(Table::Goals, &query)?;
        rows.into_iter().next().map(decode).transpose()
    }

    /// Fails with [`TrackerError::Constraint`] if the user already has a goal for `date`.
    pub fn create_goal(
        &self,
        user_id: &str,
        date: NaiveDate,
        calorie_goal: i64,
        water_goal_ml: i64,
    ) -> Result<Goal> {
        require_user(user_id)?;
        let goal = NewGoal::validated(date, calorie_goal, water_goal_ml)?;
        let row = self.store.insert(
            Table::Goals,
            json!({
                "user_id": user_id,
                "date": goal.date.format("%Y-%m-%d").to_string(),
                "calorie_goal": goal.calorie_goal,
                "water_goal_ml": goal.water_goal_ml,
                "calorie_progress": 0,
                "water_progress_ml": 0,
            }),
        )?;
        decode(row)
    }

    pub fn update_goal_progress(
        &self,
        goal_id: &str,
        calorie_progress: i64,
        water_progress_ml: i64,
    ) -> Result<Goal> {
        validate_progress(calorie_progress, water_progress_ml)?;
        let mut patch = json!({
            "calorie_progress": calorie_progress,
            "water_progress_ml": water_progress_ml,
        });
        if self.store.records_sync_time() {
            patch["synced_at"] = Value::String(format_timestamp(Utc::now()));
        }
        let row = self.store.update(Table::Goals, goal_id, patch)?;
        decode(row)
    }

    #[must_use]
    pub fn records_sync_time(&self) -> bool {
        self.store.records_sync_time()
    }

    pub fn subscribe(&self, table: Table, on_change: ChangeCallback) -> Subscription {
        self.store.subscribe(table, on_change)
    }
}
