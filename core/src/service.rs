use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Timelike, Utc};

use crate::aggregate::DailyAggregator;
use crate::db::Database;
use crate::error::{Result, TrackerError};
use crate::lookup;
use crate::models::{DailyTotals, Goal, MealEvent, Table, WaterEvent};
use crate::notify::{
    ChangeCallback, ChangeEvent, ChangeFeed, ChangeKind, Subscription, SubscriptionSet,
};
use crate::store::{DataStore, EventStoreClient};
use crate::window::{DayBoundary, DayWindow};

/// The one service every view talks to.
///
/// Writes go through the [`EventStoreClient`]. After each confirmed write the service
/// publishes a pull refresh on its own feed, so the writer's views refresh even when the
/// store's push notifications are late or missing.
pub struct TrackerService {
    client: EventStoreClient,
    aggregator: DailyAggregator,
    boundary: DayBoundary,
    refresh: ChangeFeed,
}

impl TrackerService {
    pub fn new(store: Arc<dyn DataStore>, boundary: DayBoundary) -> Self {
        let client = EventStoreClient::new(store);
        let aggregator = DailyAggregator::new(client.clone(), boundary);
        Self {
            client,
            aggregator,
            boundary,
            refresh: ChangeFeed::new(),
        }
    }

    pub fn new_in_memory(boundary: DayBoundary) -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::new(Arc::new(db), boundary))
    }

    #[must_use]
    pub fn client(&self) -> &EventStoreClient {
        &self.client
    }

    #[must_use]
    pub fn boundary(&self) -> DayBoundary {
        self.boundary
    }

    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.boundary.today()
    }

    /// Evaluated on every call; never cached across a day boundary.
    #[must_use]
    pub fn today_window(&self) -> DayWindow {
        self.boundary.today_window()
    }

    /// The current wall-clock time to the minute, the default for a new meal.
    #[must_use]
    pub fn default_meal_time(&self) -> NaiveTime {
        let now = self.boundary.time_of(Utc::now());
        NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap_or(now)
    }

    // --- Reads ---

    pub fn meals_today(&self, user_id: &str) -> Result<Vec<MealEvent>> {
        self.client.meals_in(user_id, &self.today_window())
    }

    pub fn water_today(&self, user_id: &str) -> Result<Vec<WaterEvent>> {
        self.client.water_in(user_id, &self.today_window())
    }

    pub fn totals_today(&self, user_id: &str) -> Result<DailyTotals> {
        self.aggregator
            .compute_daily_totals(user_id, &self.today_window())
    }

    pub fn totals_for(&self, user_id: &str, date: NaiveDate) -> Result<DailyTotals> {
        self.aggregator
            .compute_daily_totals(user_id, &self.boundary.window(date))
    }

    pub fn goal_today(&self, user_id: &str) -> Result<Option<Goal>> {
        self.client.goal_for(user_id, self.today())
    }

    pub fn goal_for(&self, user_id: &str, date: NaiveDate) -> Result<Option<Goal>> {
        self.client.goal_for(user_id, date)
    }

    // --- Writes ---

    pub fn add_meal(
        &self,
        user_id: &str,
        food_name: &str,
        calories: i64,
        meal_time: Option<NaiveTime>,
    ) -> Result<MealEvent> {
        let meal_time = meal_time.unwrap_or_else(|| self.default_meal_time());
        let meal = self
            .client
            .append_meal(user_id, food_name, calories, meal_time)?;
        tracing::info!(food = %meal.food_name, calories = meal.calories, "meal added");
        self.announce(Table::Meals, ChangeKind::Insert, user_id, &meal.id);
        Ok(meal)
    }

    pub fn add_water(&self, user_id: &str, amount_ml: i64) -> Result<WaterEvent> {
        let water = self.client.append_water(user_id, amount_ml)?;
        tracing::info!(amount_ml = water.amount_ml, "water added");
        self.announce(Table::WaterIntake, ChangeKind::Insert, user_id, &water.id);
        Ok(water)
    }

    /// Create the goal for `date`. A day's goal is set once; a second attempt fails with
    /// [`TrackerError::Duplicate`] and leaves the existing goal as it was. Other constraint
    /// failures pass through with the store's message.
    pub fn set_goals(
        &self,
        user_id: &str,
        date: NaiveDate,
        calorie_goal: i64,
        water_goal_ml: i64,
    ) -> Result<Goal> {
        let goal = self
            .client
            .create_goal(user_id, date, calorie_goal, water_goal_ml)
            .map_err(|e| match e {
                TrackerError::Duplicate(_) => TrackerError::Duplicate(format!(
                    "Goals for {date} are already set; use sync to refresh progress"
                )),
                other => other,
            })?;
        tracing::info!(%date, calorie_goal, water_goal_ml, "goals set");
        self.announce(Table::Goals, ChangeKind::Insert, user_id, &goal.id);
        Ok(goal)
    }

    /// Copy the day's totals onto the goal for `date`.
    pub fn sync_goal(&self, user_id: &str, date: NaiveDate) -> Result<Goal> {
        let goal = self
            .client
            .goal_for(user_id, date)?
            .ok_or_else(|| TrackerError::NotFound(format!("no goals set for {date}")))?;
        let synced = self.aggregator.sync_goal_progress(&goal)?;
        self.announce(Table::Goals, ChangeKind::Update, user_id, &synced.id);
        Ok(synced)
    }

    fn announce(&self, table: Table, kind: ChangeKind, user_id: &str, row_id: &str) {
        self.refresh
            .publish(&ChangeEvent::pull(table, kind, user_id, row_id));
    }

    // --- Lookups ---

    pub fn lookup_calories(&self, food_name: &str) -> Result<u32> {
        lookup::lookup_calories(food_name)
    }

    pub fn recommend(&self, symptom: &str) -> Result<&'static str> {
        lookup::lookup_recommendation(symptom)
    }

    // --- Change notification ---

    /// Push events from the Data Store.
    pub fn subscribe_store(&self, table: Table, on_change: ChangeCallback) -> Subscription {
        self.client.subscribe(table, on_change)
    }

    /// Pull refreshes published after this service's own writes.
    pub fn subscribe_refresh(&self, table: Table, on_change: ChangeCallback) -> Subscription {
        self.refresh.subscribe(table, on_change)
    }

    /// Register `on_change` for both push and pull events on `table`.
    pub fn watch(&self, table: Table, on_change: &ChangeCallback, into: &mut SubscriptionSet) {
        into.push(self.subscribe_store(table, Arc::clone(on_change)));
        into.push(self.subscribe_refresh(table, Arc::clone(on_change)));
    }

    #[must_use]
    pub fn active_refresh_subscriptions(&self) -> usize {
        self.refresh.active_subscriptions()
    }
}
