mod app;
mod commands;
mod config;
mod realtime;
mod remote;
mod session;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::commands::{
    cmd_calories, cmd_goal_set, cmd_goal_show, cmd_goal_sync, cmd_login, cmd_logout, cmd_meal,
    cmd_recommend, cmd_shell, cmd_signup, cmd_today, cmd_water, cmd_whoami,
};
use crate::config::Config;

#[derive(Parser)]
#[command(
    name = "tally",
    version,
    about = "Track meals, water and daily goals",
    long_about = "Track meals, water and daily goals.\n\n\
        Data lives in a local SQLite database by default, or in a hosted backend when \
        `backend = \"remote\"` is configured."
)]
struct Cli {
    /// Extra config file layered over the default one
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account and sign in
    Signup {
        email: String,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sign in
    Login {
        email: String,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sign out and forget the saved session
    Logout {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the signed-in user
    Whoami {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a day's meals, totals and goal progress (defaults to today)
    Today {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log a meal
    Meal {
        /// Food name
        food: String,
        /// Calories; looked up in the built-in table when omitted
        #[arg(short, long)]
        calories: Option<i64>,
        /// Time eaten (HH:MM, default: now)
        #[arg(short, long)]
        time: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log water
    Water {
        /// Amount in ml
        amount_ml: Option<i64>,
        /// Quick amount: 1 = 250 ml, 2 = 500 ml, 3 = 750 ml
        #[arg(short, long, conflicts_with = "amount_ml")]
        quick: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage daily goals
    Goal {
        #[command(subcommand)]
        command: GoalCommands,
    },
    /// Look up typical calories for a food
    Calories {
        food: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Suggest foods for a symptom
    Recommend {
        symptom: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive shell with dashboard, water, goals, calculator and recommender views
    Shell,
}

#[derive(Subcommand)]
enum GoalCommands {
    /// Set the calorie and water goals for a day (once per day)
    Set {
        /// Daily calorie goal
        calories: i64,
        /// Daily water goal in ml
        water_ml: i64,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a day's goals and last synced progress
    Show {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Copy the day's totals onto its goal
    Sync {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let app = App::open(config)?;

    match cli.command {
        Commands::Signup {
            email,
            password,
            json,
        } => cmd_signup(&app, &email, password, json),
        Commands::Login {
            email,
            password,
            json,
        } => cmd_login(&app, &email, password, json),
        Commands::Logout { json } => cmd_logout(&app, json),
        Commands::Whoami { json } => cmd_whoami(&app, json),
        Commands::Today { date, json } => cmd_today(&app, date.as_deref(), json),
        Commands::Meal {
            food,
            calories,
            time,
            json,
        } => cmd_meal(&app, &food, calories, time.as_deref(), json),
        Commands::Water {
            amount_ml,
            quick,
            json,
        } => cmd_water(&app, amount_ml, quick, json),
        Commands::Goal { command } => match command {
            GoalCommands::Set {
                calories,
                water_ml,
                date,
                json,
            } => cmd_goal_set(&app, calories, water_ml, date.as_deref(), json),
            GoalCommands::Show { date, json } => cmd_goal_show(&app, date.as_deref(), json),
            GoalCommands::Sync { date, json } => cmd_goal_sync(&app, date.as_deref(), json),
        },
        Commands::Calories { food, json } => cmd_calories(&app, &food, json),
        Commands::Recommend { symptom, json } => cmd_recommend(&app, &symptom, json),
        Commands::Shell => cmd_shell(&app),
    }
}
