use crate::error::Result;
use crate::models::{DailyTotals, Goal, MealEvent, WaterEvent};
use crate::store::EventStoreClient;
use crate::window::{DayBoundary, DayWindow};

#[must_use]
pub fn total_calories(meals: &[MealEvent]) -> i64 {
    meals.iter().map(|m| m.calories).sum()
}

#[must_use]
pub fn total_water_ml(water: &[WaterEvent]) -> i64 {
    water.iter().map(|w| w.amount_ml).sum()
}

/// Computes per-day totals from event rows and copies them onto goals.
///
/// Totals are always recomputed from the rows; nothing is cached between calls, so
/// recomputation after a change event is idempotent.
#[derive(Clone)]
pub struct DailyAggregator {
    client: EventStoreClient,
    boundary: DayBoundary,
}

impl DailyAggregator {
    pub fn new(client: EventStoreClient, boundary: DayBoundary) -> Self {
        Self { client, boundary }
    }

    #[must_use]
    pub fn boundary(&self) -> DayBoundary {
        self.boundary
    }

    pub fn compute_daily_totals(&self, user_id: &str, window: &DayWindow) -> Result<DailyTotals> {
        let meals = self.client.meals_in(user_id, window)?;
        let water = self.client.water_in(user_id, window)?;
        Ok(DailyTotals {
            total_calories: total_calories(&meals),
            total_water_ml: total_water_ml(&water),
        })
    }

    /// Recompute totals for the goal's own date and store them as its progress.
    pub fn sync_goal_progress(&self, goal: &Goal) -> Result<Goal> {
        let window = self.boundary.window(goal.date);
        let totals = self.compute_daily_totals(&goal.user_id, &window)?;
        tracing::debug!(
            goal = %goal.id,
            date = %goal.date,
            calories = totals.total_calories,
            water_ml = totals.total_water_ml,
            "syncing goal progress"
        );
        self.client
            .update_goal_progress(&goal.id, totals.total_calories, totals.total_water_ml)
    }
}
