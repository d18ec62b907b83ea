//! Headless view models for the interactive shell.
//!
//! A view owns its state behind an `Arc<Mutex<_>>` and hands its change listeners only a
//! `Weak` to it. Results that arrive after the view is gone find nothing to upgrade and
//! are dropped. Everything a view subscribes to while shown lives in one
//! [`SubscriptionSet`] and is released when the view is hidden.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::aggregate::{total_calories, total_water_ml};
use crate::auth::Session;
use crate::error::{Result, TrackerError};
use crate::lookup;
use crate::models::{
    DEFAULT_CALORIE_GOAL, DEFAULT_WATER_GOAL_ML, Goal, MealEvent, QUICK_ADD_WATER_ML,
    RECOMMENDED_WATER_RANGE_ML, Table,
};
use crate::notify::{ChangeCallback, ChangeEvent, SubscriptionSet};
use crate::service::TrackerService;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Percentage of `goal` reached by `progress`; `None` when there is no positive goal.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percent(progress: i64, goal: i64) -> Option<f64> {
    if goal <= 0 {
        return None;
    }
    Some(progress as f64 / goal as f64 * 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewId {
    Dashboard,
    Water,
    Goals,
    Calculator,
    Recommender,
}

impl ViewId {
    pub const ALL: [ViewId; 5] = [
        ViewId::Dashboard,
        ViewId::Water,
        ViewId::Goals,
        ViewId::Calculator,
        ViewId::Recommender,
    ];

    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Dashboard => "Dashboard",
            Self::Water => "Water Tracker",
            Self::Goals => "Daily Goals",
            Self::Calculator => "Calorie Calculator",
            Self::Recommender => "Food Recommender",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::Water => "water",
            Self::Goals => "goals",
            Self::Calculator => "calculator",
            Self::Recommender => "recommender",
        }
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ViewId {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_lowercase();
        ViewId::ALL
            .into_iter()
            .find(|v| v.key() == key || (!key.is_empty() && v.key().starts_with(&key)))
            .ok_or_else(|| {
                let names: Vec<&str> = ViewId::ALL.iter().map(|v| v.key()).collect();
                TrackerError::NotFound(format!(
                    "no view named '{}'; available: {}",
                    s.trim(),
                    names.join(", ")
                ))
            })
    }
}

// --- Notices ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Non-blocking messages for the user, drained by the renderer.
#[derive(Clone, Default)]
pub struct Notices {
    queue: Arc<Mutex<VecDeque<Notice>>>,
}

impl Notices {
    pub fn info(&self, message: impl Into<String>) {
        lock(&self.queue).push_back(Notice {
            level: NoticeLevel::Info,
            message: message.into(),
        });
    }

    pub fn error(&self, err: &TrackerError) {
        tracing::warn!(error = %err, "action failed");
        lock(&self.queue).push_back(Notice {
            level: NoticeLevel::Error,
            message: err.to_string(),
        });
    }

    #[must_use]
    pub fn drain(&self) -> Vec<Notice> {
        lock(&self.queue).drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }
}

/// What every view needs: the shared service, the signed-in user, the notice queue.
#[derive(Clone)]
pub struct ViewContext {
    service: Arc<TrackerService>,
    user_id: String,
    notices: Notices,
}

impl ViewContext {
    pub fn new(service: Arc<TrackerService>, user_id: impl Into<String>, notices: Notices) -> Self {
        Self {
            service,
            user_id: user_id.into(),
            notices,
        }
    }

    #[must_use]
    pub fn service(&self) -> &TrackerService {
        &self.service
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    /// Run a user action; on failure post an error notice and return `None`.
    fn attempt<T>(&self, action: impl FnOnce(&TrackerService, &str) -> Result<T>) -> Option<T> {
        match action(&self.service, &self.user_id) {
            Ok(value) => Some(value),
            Err(err) => {
                self.notices.error(&err);
                None
            }
        }
    }
}

/// Apply a completed fetch to view state, unless the view has been torn down.
fn apply<S, T>(
    ctx: &ViewContext,
    state: &Weak<Mutex<S>>,
    fetched: Result<T>,
    update: impl FnOnce(&mut S, T),
) {
    let Some(state) = state.upgrade() else {
        tracing::debug!("view gone; ignoring late result");
        return;
    };
    match fetched {
        Ok(value) => update(&mut lock(&state), value),
        Err(err) => ctx.notices.error(&err),
    }
}

type RefreshFn<S> = fn(&ViewContext, &Weak<Mutex<S>>);

/// A change listener that refreshes the view behind `state` for this context's user.
fn listener<S: Send + 'static>(
    ctx: &ViewContext,
    state: &Arc<Mutex<S>>,
    refresh: RefreshFn<S>,
) -> ChangeCallback {
    let ctx = ctx.clone();
    let weak = Arc::downgrade(state);
    Arc::new(move |event: &ChangeEvent| {
        if event.user_id.as_deref().is_some_and(|u| u != ctx.user_id) {
            return;
        }
        refresh(&ctx, &weak);
    })
}

pub trait View {
    fn id(&self) -> ViewId;
    /// Subscribe to the tables the view displays and load its state.
    fn mount(&mut self);
    /// Release every subscription taken in `mount`.
    fn unmount(&mut self);
    fn refresh(&self);
    fn active_subscriptions(&self) -> usize;
}

// --- Dashboard ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MealDraft {
    pub food_name: String,
    pub calories: Option<i64>,
    pub meal_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardState {
    pub date: Option<NaiveDate>,
    /// Today's meals, earliest meal time first.
    pub meals: Vec<MealEvent>,
    pub total_calories: i64,
    pub total_water_ml: i64,
    /// The open add-meal form, if any.
    pub draft: Option<MealDraft>,
}

pub struct DashboardView {
    ctx: ViewContext,
    state: Arc<Mutex<DashboardState>>,
    subscriptions: SubscriptionSet,
}

fn refresh_dashboard(ctx: &ViewContext, state: &Weak<Mutex<DashboardState>>) {
    let date = ctx.service.today();
    // Meals and water are independent; each fetch updates its own part of the state.
    let meals = ctx.service.meals_today(&ctx.user_id);
    apply(ctx, state, meals, |s, meals| {
        s.date = Some(date);
        s.total_calories = total_calories(&meals);
        s.meals = meals;
    });
    let water = ctx.service.water_today(&ctx.user_id);
    apply(ctx, state, water, |s, water| {
        s.date = Some(date);
        s.total_water_ml = total_water_ml(&water);
    });
}

impl DashboardView {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            ctx,
            state: Arc::new(Mutex::new(DashboardState::default())),
            subscriptions: SubscriptionSet::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> DashboardState {
        lock(&self.state).clone()
    }

    /// Open the add-meal form, optionally prefilled.
    pub fn open_add_meal(&self, prefill: Option<MealDraft>) {
        lock(&self.state).draft = Some(prefill.unwrap_or_default());
    }

    pub fn cancel_add_meal(&self) {
        lock(&self.state).draft = None;
    }

    /// Submit a meal. On success the form closes; on failure it stays as it was and an
    /// error notice is posted.
    pub fn submit_meal(&self, draft: &MealDraft) -> Option<MealEvent> {
        let calories = match draft.calories {
            Some(c) => c,
            None => {
                self.ctx.notices.error(&TrackerError::Validation(
                    "Calories are required".to_string(),
                ));
                return None;
            }
        };
        let meal = self.ctx.attempt(|service, user| {
            service.add_meal(user, &draft.food_name, calories, draft.meal_time)
        })?;
        lock(&self.state).draft = None;
        self.ctx
            .notices
            .info(format!("Added {} ({} kcal)", meal.food_name, meal.calories));
        Some(meal)
    }
}

impl View for DashboardView {
    fn id(&self) -> ViewId {
        ViewId::Dashboard
    }

    fn mount(&mut self) {
        let on_change = listener(&self.ctx, &self.state, refresh_dashboard);
        self.ctx
            .service
            .watch(Table::Meals, &on_change, &mut self.subscriptions);
        self.ctx
            .service
            .watch(Table::WaterIntake, &on_change, &mut self.subscriptions);
        self.refresh();
    }

    fn unmount(&mut self) {
        self.subscriptions.release();
    }

    fn refresh(&self) {
        refresh_dashboard(&self.ctx, &Arc::downgrade(&self.state));
    }

    fn active_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }
}

// --- Water ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WaterState {
    pub total_water_ml: i64,
    pub servings: usize,
}

pub struct WaterView {
    ctx: ViewContext,
    state: Arc<Mutex<WaterState>>,
    subscriptions: SubscriptionSet,
}

fn refresh_water(ctx: &ViewContext, state: &Weak<Mutex<WaterState>>) {
    let water = ctx.service.water_today(&ctx.user_id);
    apply(ctx, state, water, |s, water| {
        s.total_water_ml = total_water_ml(&water);
        s.servings = water.len();
    });
}

impl WaterView {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            ctx,
            state: Arc::new(Mutex::new(WaterState::default())),
            subscriptions: SubscriptionSet::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> WaterState {
        lock(&self.state).clone()
    }

    #[must_use]
    pub fn quick_amounts() -> &'static [i64] {
        QUICK_ADD_WATER_ML
    }

    #[must_use]
    pub fn recommended_range() -> (i64, i64) {
        RECOMMENDED_WATER_RANGE_ML
    }

    pub fn add(&self, amount_ml: i64) -> bool {
        let added = self
            .ctx
            .attempt(|service, user| service.add_water(user, amount_ml));
        if let Some(water) = &added {
            self.ctx.notices.info(format!("Added {} ml", water.amount_ml));
        }
        added.is_some()
    }

    /// Add the `index`-th quick amount (250, 500 or 750 ml).
    pub fn quick_add(&self, index: usize) -> bool {
        match QUICK_ADD_WATER_ML.get(index) {
            Some(amount) => self.add(*amount),
            None => {
                self.ctx.notices.error(&TrackerError::Validation(format!(
                    "no quick amount #{}",
                    index + 1
                )));
                false
            }
        }
    }
}

impl View for WaterView {
    fn id(&self) -> ViewId {
        ViewId::Water
    }

    fn mount(&mut self) {
        let on_change = listener(&self.ctx, &self.state, refresh_water);
        self.ctx
            .service
            .watch(Table::WaterIntake, &on_change, &mut self.subscriptions);
        self.refresh();
    }

    fn unmount(&mut self) {
        self.subscriptions.release();
    }

    fn refresh(&self) {
        refresh_water(&self.ctx, &Arc::downgrade(&self.state));
    }

    fn active_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }
}

// --- Goals ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoalsState {
    pub date: Option<NaiveDate>,
    /// Today's goal, once set. Its progress is the snapshot taken at the last sync.
    pub goal: Option<Goal>,
    pub calorie_draft: i64,
    pub water_draft_ml: i64,
    /// False when the store keeps no sync time, so "not synced" cannot be told apart.
    pub tracks_sync_time: bool,
}

impl Default for GoalsState {
    fn default() -> Self {
        Self {
            date: None,
            goal: None,
            calorie_draft: DEFAULT_CALORIE_GOAL,
            water_draft_ml: DEFAULT_WATER_GOAL_ML,
            tracks_sync_time: true,
        }
    }
}

impl GoalsState {
    #[must_use]
    pub fn calorie_percent(&self) -> Option<f64> {
        self.goal
            .as_ref()
            .and_then(|g| percent(g.calorie_progress, g.calorie_goal))
    }

    #[must_use]
    pub fn water_percent(&self) -> Option<f64> {
        self.goal
            .as_ref()
            .and_then(|g| percent(g.water_progress_ml, g.water_goal_ml))
    }

    /// Whether the goal's progress has been synced at least once.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.goal.as_ref().is_some_and(|g| g.synced_at.is_some())
    }

    /// A goal exists and is known never to have been synced.
    #[must_use]
    pub fn sync_pending(&self) -> bool {
        self.tracks_sync_time && self.goal.is_some() && !self.is_synced()
    }
}

pub struct GoalsView {
    ctx: ViewContext,
    state: Arc<Mutex<GoalsState>>,
    subscriptions: SubscriptionSet,
}

fn refresh_goals(ctx: &ViewContext, state: &Weak<Mutex<GoalsState>>) {
    let date = ctx.service.today();
    let goal = ctx.service.goal_for(&ctx.user_id, date);
    let tracks_sync_time = ctx.service.client().records_sync_time();
    apply(ctx, state, goal, |s, goal| {
        s.date = Some(date);
        s.tracks_sync_time = tracks_sync_time;
        if let Some(goal) = &goal {
            s.calorie_draft = goal.calorie_goal;
            s.water_draft_ml = goal.water_goal_ml;
        }
        s.goal = goal;
    });
}

impl GoalsView {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            ctx,
            state: Arc::new(Mutex::new(GoalsState::default())),
            subscriptions: SubscriptionSet::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> GoalsState {
        lock(&self.state).clone()
    }

    pub fn set_drafts(&self, calorie_goal: i64, water_goal_ml: i64) {
        let mut state = lock(&self.state);
        state.calorie_draft = calorie_goal;
        state.water_draft_ml = water_goal_ml;
    }

    /// Set today's goals from the drafts.
    pub fn save(&self) -> Option<Goal> {
        let (calories, water) = {
            let state = lock(&self.state);
            (state.calorie_draft, state.water_draft_ml)
        };
        let goal = self.ctx.attempt(|service, user| {
            service.set_goals(user, service.today(), calories, water)
        })?;
        self.ctx.notices.info("Goals saved");
        Some(goal)
    }

    /// Copy today's totals onto today's goal.
    pub fn sync(&self) -> Option<Goal> {
        let goal = self
            .ctx
            .attempt(|service, user| service.sync_goal(user, service.today()))?;
        self.ctx.notices.info("Progress synced");
        Some(goal)
    }
}

impl View for GoalsView {
    fn id(&self) -> ViewId {
        ViewId::Goals
    }

    fn mount(&mut self) {
        let on_change = listener(&self.ctx, &self.state, refresh_goals);
        self.ctx
            .service
            .watch(Table::Goals, &on_change, &mut self.subscriptions);
        self.refresh();
    }

    fn unmount(&mut self) {
        self.subscriptions.release();
    }

    fn refresh(&self) {
        refresh_goals(&self.ctx, &Arc::downgrade(&self.state));
    }

    fn active_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }
}

// --- Calculator ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CalculatorState {
    pub query: String,
    /// The matched food and its calories.
    pub result: Option<(String, u32)>,
}

pub struct CalculatorView {
    ctx: ViewContext,
    state: CalculatorState,
}

impl CalculatorView {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            ctx,
            state: CalculatorState::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &CalculatorState {
        &self.state
    }

    pub fn calculate(&mut self, food_name: &str) -> Option<u32> {
        self.state.query = food_name.to_string();
        match lookup::lookup_calories(food_name) {
            Ok(calories) => {
                self.state.result = Some((food_name.trim().to_string(), calories));
                Some(calories)
            }
            Err(err) => {
                self.state.result = None;
                self.ctx.notices.error(&err);
                self.ctx.notices.info(format!(
                    "Known foods: {}",
                    lookup::known_foods().join(", ")
                ));
                None
            }
        }
    }

    /// A meal draft prefilled from the last successful lookup.
    #[must_use]
    pub fn meal_draft(&self) -> Option<MealDraft> {
        self.state.result.as_ref().map(|(name, calories)| MealDraft {
            food_name: name.clone(),
            calories: Some(i64::from(*calories)),
            meal_time: None,
        })
    }
}

impl View for CalculatorView {
    fn id(&self) -> ViewId {
        ViewId::Calculator
    }

    fn mount(&mut self) {}

    fn unmount(&mut self) {}

    fn refresh(&self) {}

    fn active_subscriptions(&self) -> usize {
        0
    }
}

// --- Recommender ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecommenderState {
    pub symptom: String,
    pub foods: Option<&'static str>,
}

pub struct RecommenderView {
    ctx: ViewContext,
    state: RecommenderState,
}

impl RecommenderView {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            ctx,
            state: RecommenderState::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &RecommenderState {
        &self.state
    }

    pub fn recommend(&mut self, symptom: &str) -> Option<&'static str> {
        self.state.symptom = symptom.to_string();
        match lookup::lookup_recommendation(symptom) {
            Ok(foods) => {
                self.state.foods = Some(foods);
                Some(foods)
            }
            Err(err) => {
                self.state.foods = None;
                self.ctx.notices.error(&err);
                self.ctx.notices.info(format!(
                    "Try one of: {}",
                    lookup::known_symptoms().join(", ")
                ));
                None
            }
        }
    }
}

impl View for RecommenderView {
    fn id(&self) -> ViewId {
        ViewId::Recommender
    }

    fn mount(&mut self) {}

    fn unmount(&mut self) {}

    fn refresh(&self) {}

    fn active_subscriptions(&self) -> usize {
        0
    }
}

// --- Shell ---

pub enum ActiveView {
    Dashboard(DashboardView),
    Water(WaterView),
    Goals(GoalsView),
    Calculator(CalculatorView),
    Recommender(RecommenderView),
}

impl ActiveView {
    fn build(id: ViewId, ctx: ViewContext) -> Self {
        match id {
            ViewId::Dashboard => Self::Dashboard(DashboardView::new(ctx)),
            ViewId::Water => Self::Water(WaterView::new(ctx)),
            ViewId::Goals => Self::Goals(GoalsView::new(ctx)),
            ViewId::Calculator => Self::Calculator(CalculatorView::new(ctx)),
            ViewId::Recommender => Self::Recommender(RecommenderView::new(ctx)),
        }
    }

    fn as_view(&self) -> &dyn View {
        match self {
            Self::Dashboard(v) => v,
            Self::Water(v) => v,
            Self::Goals(v) => v,
            Self::Calculator(v) => v,
            Self::Recommender(v) => v,
        }
    }

    fn as_view_mut(&mut self) -> &mut dyn View {
        match self {
            Self::Dashboard(v) => v,
            Self::Water(v) => v,
            Self::Goals(v) => v,
            Self::Calculator(v) => v,
            Self::Recommender(v) => v,
        }
    }
}

/// Owns the active view for one signed-in user. Exactly one view is mounted at a time.
pub struct Shell {
    ctx: ViewContext,
    active: ActiveView,
}

impl Shell {
    /// A shell scoped to `session`'s user, starting on the dashboard. Without a session
    /// the user has to sign in first.
    pub fn for_session(service: Arc<TrackerService>, session: Option<&Session>) -> Result<Self> {
        let session = session
            .ok_or_else(|| TrackerError::Auth("login required".to_string()))?;
        let ctx = ViewContext::new(service, session.user.id.clone(), Notices::default());
        let mut active = ActiveView::build(ViewId::Dashboard, ctx.clone());
        active.as_view_mut().mount();
        Ok(Self { ctx, active })
    }

    #[must_use]
    pub fn current(&self) -> ViewId {
        self.active.as_view().id()
    }

    #[must_use]
    pub fn active(&self) -> &ActiveView {
        &self.active
    }

    pub fn active_mut(&mut self) -> &mut ActiveView {
        &mut self.active
    }

    #[must_use]
    pub fn notices(&self) -> &Notices {
        &self.ctx.notices
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.ctx.user_id
    }

    /// Switch to `id`, tearing down the current view first. Showing the current view
    /// again just refreshes it.
    pub fn show(&mut self, id: ViewId) {
        if self.current() == id {
            self.active.as_view().refresh();
            return;
        }
        self.active.as_view_mut().unmount();
        tracing::debug!(from = %self.current(), to = %id, "switching view");
        self.active = ActiveView::build(id, self.ctx.clone());
        self.active.as_view_mut().mount();
    }

    /// Take the calculator's result to the dashboard's add-meal form.
    pub fn add_calculated_to_meals(&mut self) -> bool {
        let draft = match &self.active {
            ActiveView::Calculator(calc) => calc.meal_draft(),
            _ => None,
        };
        let Some(draft) = draft else {
            self.ctx
                .notices
                .error(&TrackerError::Validation("look up a food first".to_string()));
            return false;
        };
        self.show(ViewId::Dashboard);
        if let ActiveView::Dashboard(dashboard) = &self.active {
            dashboard.open_add_meal(Some(draft));
        }
        true
    }

    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.active.as_view().active_subscriptions()
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        self.active.as_view_mut().unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthUser;
    use crate::db::Database;
    use crate::window::DayBoundary;

    fn session(user: &str) -> Session {
        Session {
            access_token: "token".into(),
            user: AuthUser {
                id: user.into(),
                email: format!("{user}@example.com"),
            },
            expires_at: None,
            refresh_token: None,
        }
    }

    fn setup() -> (Arc<Database>, Arc<TrackerService>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let service = Arc::new(TrackerService::new(db.clone(), DayBoundary::Utc));
        (db, service)
    }

    fn ctx(service: &Arc<TrackerService>, user: &str) -> ViewContext {
        ViewContext::new(Arc::clone(service), user, Notices::default())
    }

    #[test]
    fn test_percent_guards_zero_goal() {
        assert_eq!(percent(500, 2000), Some(25.0));
        assert_eq!(percent(0, 2500), Some(0.0));
        assert_eq!(percent(100, 0), None);
        assert_eq!(percent(100, -5), None);
    }

    #[test]
    fn test_view_id_parse() {
        assert_eq!("water".parse::<ViewId>().unwrap(), ViewId::Water);
        assert_eq!(" Goals ".parse::<ViewId>().unwrap(), ViewId::Goals);
        assert_eq!("calc".parse::<ViewId>().unwrap(), ViewId::Calculator);
        assert!("".parse::<ViewId>().is_err());
        assert!("settings".parse::<ViewId>().unwrap_err().is_not_found());
    }

    #[test]
    fn test_dashboard_refreshes_on_writes() {
        let (_db, service) = setup();
        let mut view = DashboardView::new(ctx(&service, "u1"));
        view.mount();
        assert_eq!(view.state().total_calories, 0);

        service.add_meal("u1", "Toast", 69, NaiveTime::from_hms_opt(9, 0, 0)).unwrap();
        service.add_meal("u1", "Eggs", 78, NaiveTime::from_hms_opt(8, 0, 0)).unwrap();
        service.add_water("u1", 250).unwrap();
        service.add_water("u1", 500).unwrap();

        let state = view.state();
        assert_eq!(state.total_calories, 147);
        assert_eq!(state.total_water_ml, 750);
        let names: Vec<&str> = state.meals.iter().map(|m| m.food_name.as_str()).collect();
        assert_eq!(names, vec!["Eggs", "Toast"]);
        assert_eq!(state.date, Some(service.today()));
    }

    #[test]
    fn test_dashboard_ignores_other_users() {
        let (_db, service) = setup();
        let mut view = DashboardView::new(ctx(&service, "u1"));
        view.mount();
        service.add_water("u2", 500).unwrap();
        assert_eq!(view.state().total_water_ml, 0);
    }

    #[test]
    fn test_push_alone_refreshes_view() {
        let (db, service) = setup();
        let mut view = WaterView::new(ctx(&service, "u1"));
        view.mount();
        // A write that bypasses the service: only the store's push event fires
        service.client().append_water("u1", 300).unwrap();
        assert_eq!(view.state().total_water_ml, 300);
        assert_eq!(view.state().servings, 1);
        drop(view);
        assert_eq!(db.changes().active_subscriptions(), 0);
    }

    #[test]
    fn test_failed_meal_keeps_draft_and_posts_notice() {
        let (_db, service) = setup();
        let c = ctx(&service, "u1");
        let mut view = DashboardView::new(c.clone());
        view.mount();
        let draft = MealDraft {
            food_name: "Eggs".into(),
            calories: Some(0),
            meal_time: None,
        };
        view.open_add_meal(Some(draft.clone()));
        assert!(view.submit_meal(&draft).is_none());

        let state = view.state();
        assert_eq!(state.draft, Some(draft));
        assert!(state.meals.is_empty());
        let notices = c.notices().drain();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);

        let ok = MealDraft {
            food_name: "Eggs".into(),
            calories: Some(78),
            meal_time: None,
        };
        assert!(view.submit_meal(&ok).is_some());
        assert!(view.state().draft.is_none());
        assert_eq!(view.state().total_calories, 78);
    }

    #[test]
    fn test_late_result_after_teardown_is_ignored() {
        let (_db, service) = setup();
        let c = ctx(&service, "u1");
        let state = Arc::new(Mutex::new(DashboardState::default()));
        let weak = Arc::downgrade(&state);
        drop(state);

        service.add_water("u1", 500).unwrap();
        refresh_dashboard(&c, &weak);
        apply(
            &c,
            &weak,
            Err::<(), _>(TrackerError::Connectivity("late".into())),
            |_, ()| {},
        );
        assert!(c.notices().is_empty());
    }

    #[test]
    fn test_refresh_error_leaves_state_unchanged() {
        let (_db, service) = setup();
        let c = ctx(&service, "u1");
        let state = Arc::new(Mutex::new(WaterState {
            total_water_ml: 42,
            servings: 1,
        }));
        apply(
            &c,
            &Arc::downgrade(&state),
            Err::<i64, _>(TrackerError::Connectivity("offline".into())),
            |s, total| s.total_water_ml = total,
        );
        assert_eq!(state.lock().unwrap().total_water_ml, 42);
        assert_eq!(c.notices().len(), 1);
    }

    #[test]
    fn test_water_quick_add() {
        let (_db, service) = setup();
        let c = ctx(&service, "u1");
        let mut view = WaterView::new(c.clone());
        view.mount();
        assert!(view.quick_add(0));
        assert!(view.quick_add(2));
        assert!(!view.quick_add(3));
        assert!(!view.add(-10));
        assert_eq!(view.state().total_water_ml, 1000);
        assert_eq!(WaterView::quick_amounts(), &[250, 500, 750]);
    }

    #[test]
    fn test_goals_view_set_and_sync() {
        let (_db, service) = setup();
        let c = ctx(&service, "u1");
        let mut view = GoalsView::new(c.clone());
        view.mount();
        let initial = view.state();
        assert!(initial.goal.is_none());
        assert_eq!(initial.calorie_draft, 2000);
        assert_eq!(initial.water_draft_ml, 2500);
        assert_eq!(initial.calorie_percent(), None);

        view.set_drafts(1800, 3000);
        view.save().unwrap();
        let state = view.state();
        assert_eq!(state.goal.as_ref().unwrap().calorie_goal, 1800);
        assert!(!state.is_synced());
        assert!(state.sync_pending());
        assert_eq!(state.calorie_percent(), Some(0.0));

        service.add_meal("u1", "Oats", 900, None).unwrap();
        service.add_water("u1", 1500).unwrap();
        // Progress is a snapshot; new events do not move it until sync
        assert_eq!(view.state().goal.unwrap().calorie_progress, 0);

        view.sync().unwrap();
        let state = view.state();
        assert!(state.is_synced());
        assert!(!state.sync_pending());
        assert_eq!(state.calorie_percent(), Some(50.0));
        assert_eq!(state.water_percent(), Some(50.0));

        // Setting again is blocked and reported
        c.notices().drain();
        assert!(view.save().is_none());
        let notices = c.notices().drain();
        assert!(notices[0].message.contains("already set"));
        assert_eq!(view.state().goal.unwrap().calorie_progress, 900);
    }

    #[test]
    fn test_calculator_and_recommender() {
        let (_db, service) = setup();
        let c = ctx(&service, "u1");
        let mut calc = CalculatorView::new(c.clone());
        assert_eq!(calc.calculate(" Avocado "), Some(234));
        assert_eq!(
            calc.meal_draft(),
            Some(MealDraft {
                food_name: "Avocado".into(),
                calories: Some(234),
                meal_time: None,
            })
        );
        assert_eq!(calc.calculate("pizza"), None);
        assert!(calc.meal_draft().is_none());
        let notices = c.notices().drain();
        assert_eq!(notices.len(), 2);
        assert!(notices[1].message.contains("egg"));

        let mut rec = RecommenderView::new(c.clone());
        assert!(rec.recommend("Fatigue").unwrap().contains("Salmon"));
        assert!(rec.recommend("hiccups").is_none());
        let notices = c.notices().drain();
        assert!(notices[1].message.contains("muscle pain"));
    }

    #[test]
    fn test_shell_requires_session() {
        let (_db, service) = setup();
        let err = Shell::for_session(service, None).err().unwrap();
        assert!(matches!(err, TrackerError::Auth(_)));
    }

    #[test]
    fn test_show_hide_cycles_do_not_leak_subscriptions() {
        let (db, service) = setup();
        let mut shell = Shell::for_session(Arc::clone(&service), Some(&session("u1"))).unwrap();
        assert_eq!(shell.current(), ViewId::Dashboard);
        let store_baseline = db.changes().active_subscriptions();
        let refresh_baseline = service.active_refresh_subscriptions();
        assert_eq!(store_baseline, 2);
        assert_eq!(refresh_baseline, 2);

        for _ in 0..20 {
            for id in ViewId::ALL {
                shell.show(id);
            }
            shell.show(ViewId::Dashboard);
        }
        assert_eq!(db.changes().active_subscriptions(), store_baseline);
        assert_eq!(service.active_refresh_subscriptions(), refresh_baseline);

        shell.show(ViewId::Calculator);
        assert_eq!(db.changes().active_subscriptions(), 0);
        assert_eq!(shell.active_subscriptions(), 0);

        shell.show(ViewId::Goals);
        drop(shell);
        assert_eq!(db.changes().active_subscriptions(), 0);
        assert_eq!(service.active_refresh_subscriptions(), 0);
    }

    #[test]
    fn test_calculator_result_opens_prefilled_meal_form() {
        let (_db, service) = setup();
        let mut shell = Shell::for_session(service, Some(&session("u1"))).unwrap();
        assert!(!shell.add_calculated_to_meals());

        shell.show(ViewId::Calculator);
        if let ActiveView::Calculator(calc) = shell.active_mut() {
            calc.calculate("banana");
        }
        assert!(shell.add_calculated_to_meals());
        assert_eq!(shell.current(), ViewId::Dashboard);
        let ActiveView::Dashboard(dashboard) = shell.active() else {
            panic!("expected dashboard");
        };
        let draft = dashboard.state().draft.unwrap();
        assert_eq!(draft.food_name, "banana");
        assert_eq!(draft.calories, Some(105));
    }
}
