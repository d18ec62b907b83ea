mod auth;
mod goal;
mod helpers;
mod lookup;
mod meal;
mod shell;
mod today;
mod water;

pub(crate) use auth::{cmd_login, cmd_logout, cmd_signup, cmd_whoami};
pub(crate) use goal::{cmd_goal_set, cmd_goal_show, cmd_goal_sync};
pub(crate) use lookup::{cmd_calories, cmd_recommend};
pub(crate) use meal::cmd_meal;
pub(crate) use shell::cmd_shell;
pub(crate) use today::cmd_today;
pub(crate) use water::cmd_water;
