use anyhow::Result;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tally_core::auth::AuthEvent;
use tally_core::error::TrackerError;
use tally_core::lookup;
use tally_core::models::parse_meal_time;
use tally_core::views::{ActiveView, MealDraft, NoticeLevel, Notices, Shell, ViewId, WaterView};

use crate::app::App;

use super::helpers::{meal_table, progress_line};

const HELP: &str = "\
Views:       dashboard, water, goals, calculator, recommender (any prefix)
Anywhere:    help, refresh, logout, quit
dashboard:   add <food> [calories] [HH:MM]   add (save the open form)   cancel
water:       add <ml>   quick <1-3>
goals:       set <calories> <water_ml>   sync
calculator:  lookup <food>   use (add the result to today's meals)
recommender: lookup <symptom>";

enum Step {
    Continue,
    Quit,
}

pub(crate) fn cmd_shell(app: &App) -> Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    run(app, stdin.lock(), &mut stdout.lock())
}

fn run(app: &App, input: impl BufRead, out: &mut impl Write) -> Result<()> {
    let session = app.require_session()?;
    let mut shell = Shell::for_session(Arc::clone(&app.service), Some(&session))?;

    let signed_out = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&signed_out);
    let _auth = app.auth.on_session_change(Arc::new(move |event: &AuthEvent| {
        if matches!(event, AuthEvent::SignedOut) {
            flag.store(true, Ordering::SeqCst);
        }
    }));

    writeln!(
        out,
        "Signed in as {}. Type `help` for commands.",
        session.user.email
    )?;
    write_notices(shell.notices(), out)?;
    render(&shell, out)?;
    prompt(&shell, out)?;

    for line in input.lines() {
        let step = execute(app, &mut shell, line?.trim(), out)?;
        write_notices(shell.notices(), out)?;
        if matches!(step, Step::Quit) {
            break;
        }
        if signed_out.load(Ordering::SeqCst) {
            writeln!(out, "Signed out.")?;
            break;
        }
        render(&shell, out)?;
        prompt(&shell, out)?;
    }
    Ok(())
}

fn prompt(shell: &Shell, out: &mut impl Write) -> io::Result<()> {
    write!(out, "{}> ", shell.current())?;
    out.flush()
}

fn write_notices(notices: &Notices, out: &mut impl Write) -> io::Result<()> {
    for notice in notices.drain() {
        match notice.level {
            NoticeLevel::Info => writeln!(out, "  {}", notice.message)?,
            NoticeLevel::Error => writeln!(out, "  Error: {}", notice.message)?,
        }
    }
    Ok(())
}

fn execute(app: &App, shell: &mut Shell, line: &str, out: &mut impl Write) -> Result<Step> {
    let (command, args) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(c, rest)| (c, rest.trim()));
    let notices = shell.notices().clone();

    match command {
        "" => {}
        "help" | "?" => writeln!(out, "{HELP}")?,
        "quit" | "exit" | "q" => return Ok(Step::Quit),
        "refresh" => shell.show(shell.current()),
        "logout" => {
            if let Err(e) = app.auth.sign_out() {
                notices.error(&e);
            }
            app.forget()?;
        }
        "use" if shell.current() == ViewId::Calculator => {
            shell.add_calculated_to_meals();
        }
        _ => {
            if !act(shell.active_mut(), &notices, command, args) {
                match command.parse::<ViewId>() {
                    Ok(id) if args.is_empty() => shell.show(id),
                    _ => notices.info(format!("Unknown command '{command}'. Type `help`.")),
                }
            }
        }
    }
    Ok(Step::Continue)
}

/// Run a view-specific action. Returns false if the active view has no such action.
fn act(view: &mut ActiveView, notices: &Notices, command: &str, args: &str) -> bool {
    let invalid = |message: String| notices.error(&TrackerError::Validation(message));
    match (view, command) {
        (ActiveView::Dashboard(view), "add") => {
            let draft = if args.is_empty() {
                view.state().draft
            } else {
                match parse_meal_args(args) {
                    Ok(draft) => Some(draft),
                    Err(e) => {
                        notices.error(&e);
                        return true;
                    }
                }
            };
            match draft {
                Some(draft) => {
                    view.submit_meal(&draft);
                }
                None => invalid("usage: add <food> [calories] [HH:MM]".to_string()),
            }
        }
        (ActiveView::Dashboard(view), "cancel") => view.cancel_add_meal(),
        (ActiveView::Water(view), "add") => match args.parse::<i64>() {
            Ok(ml) => {
                view.add(ml);
            }
            Err(_) => invalid(format!("'{args}' is not an amount in ml")),
        },
        (ActiveView::Water(view), "quick") => {
            match args.parse::<usize>().ok().and_then(|n| n.checked_sub(1)) {
                Some(index) => {
                    view.quick_add(index);
                }
                None => invalid(format!(
                    "usage: quick <1-{}>",
                    WaterView::quick_amounts().len()
                )),
            }
        }
        (ActiveView::Goals(view), "set") => {
            let numbers: Vec<i64> = args
                .split_whitespace()
                .filter_map(|n| n.parse().ok())
                .collect();
            if let [calories, water_ml] = numbers[..] {
                view.set_drafts(calories, water_ml);
                view.save();
            } else {
                invalid("usage: set <calories> <water_ml>".to_string());
            }
        }
        (ActiveView::Goals(view), "sync") => {
            view.sync();
        }
        (ActiveView::Calculator(view), "lookup") => {
            view.calculate(args);
        }
        (ActiveView::Recommender(view), "lookup") => {
            view.recommend(args);
        }
        _ => return false,
    }
    true
}

/// `<food words...> [calories] [HH:MM]`. Without calories the calorie table is tried.
fn parse_meal_args(args: &str) -> tally_core::error::Result<MealDraft> {
    let mut words: Vec<&str> = args.split_whitespace().collect();
    let mut meal_time = None;
    if words.len() > 1 && words.last().is_some_and(|w| w.contains(':')) {
        meal_time = words.pop().map(parse_meal_time).transpose()?;
    }
    let mut calories = words
        .last()
        .filter(|_| words.len() > 1)
        .and_then(|w| w.parse::<i64>().ok());
    if calories.is_some() {
        words.pop();
    }
    let food_name = words.join(" ");
    if calories.is_none() {
        calories = lookup::lookup_calories(&food_name).ok().map(i64::from);
    }
    Ok(MealDraft {
        food_name,
        calories,
        meal_time,
    })
}

fn render(shell: &Shell, out: &mut impl Write) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "[{}]", shell.current().title())?;
    match shell.active() {
        ActiveView::Dashboard(view) => {
            let state = view.state();
            if state.meals.is_empty() {
                writeln!(out, "No meals logged today")?;
            } else {
                writeln!(out, "{}", meal_table(&state.meals))?;
            }
            writeln!(
                out,
                "Calories: {} kcal   Water: {} ml",
                state.total_calories, state.total_water_ml
            )?;
            if let Some(draft) = &state.draft {
                let calories = draft
                    .calories
                    .map_or_else(|| "? kcal".to_string(), |c| format!("{c} kcal"));
                writeln!(
                    out,
                    "Add meal: {} ({calories}). `add` to save, `cancel` to discard",
                    draft.food_name
                )?;
            }
        }
        ActiveView::Water(view) => {
            let state = view.state();
            let (low, high) = WaterView::recommended_range();
            writeln!(
                out,
                "Today: {} ml in {} servings (recommended {low}-{high} ml)",
                state.total_water_ml, state.servings
            )?;
            let quick: Vec<String> = WaterView::quick_amounts()
                .iter()
                .enumerate()
                .map(|(i, ml)| format!("{}) {ml} ml", i + 1))
                .collect();
            writeln!(out, "Quick add: {}", quick.join("  "))?;
        }
        ActiveView::Goals(view) => {
            let state = view.state();
            match &state.goal {
                Some(goal) => {
                    writeln!(
                        out,
                        "Calories: {}",
                        progress_line(goal.calorie_progress, goal.calorie_goal, "kcal")
                    )?;
                    writeln!(
                        out,
                        "Water:    {}",
                        progress_line(goal.water_progress_ml, goal.water_goal_ml, "ml")
                    )?;
                    if state.sync_pending() {
                        writeln!(out, "Progress not synced yet; `sync` to update")?;
                    }
                }
                None => writeln!(
                    out,
                    "No goals for today. Suggested: {} kcal, {} ml. `set <calories> <water_ml>`",
                    state.calorie_draft, state.water_draft_ml
                )?,
            }
        }
        ActiveView::Calculator(view) => match &view.state().result {
            Some((food, calories)) => writeln!(
                out,
                "{food}: {calories} kcal. `use` to add it to today's meals"
            )?,
            None => writeln!(out, "`lookup <food>` for typical calories per serving")?,
        },
        ActiveView::Recommender(view) => {
            let state = view.state();
            match state.foods {
                Some(foods) => writeln!(out, "For {}: {foods}", state.symptom.trim())?,
                None => writeln!(out, "`lookup <symptom>` for suggested foods")?,
            }
        }
    }
    Ok(())
}
