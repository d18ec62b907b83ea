use anyhow::Result;
use std::process;

use tally_core::auth::Session;

use crate::app::App;

use super::helpers::password_or_prompt;

fn report_signed_in(session: &Session, verb: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&session.user)?);
    } else {
        println!("{verb} as {}", session.user.email);
    }
    Ok(())
}

pub(crate) fn cmd_signup(
    app: &App,
    email: &str,
    password: Option<String>,
    json: bool,
) -> Result<()> {
    let password = password_or_prompt(password)?;
    let session = app.auth.sign_up(email, &password)?;
    report_signed_in(&session, "Signed up", json)
}

pub(crate) fn cmd_login(app: &App, email: &str, password: Option<String>, json: bool) -> Result<()> {
    let password = password_or_prompt(password)?;
    let session = app.auth.sign_in(email, &password)?;
    report_signed_in(&session, "Logged in", json)
}

pub(crate) fn cmd_logout(app: &App, json: bool) -> Result<()> {
    let was_signed_in = app.session().is_some();
    let result = app.auth.sign_out();
    // The local copy goes even if the server could not be told
    app.forget()?;
    result?;
    if json {
        println!("{}", serde_json::json!({ "logged_out": was_signed_in }));
    } else if was_signed_in {
        println!("Logged out");
    } else {
        eprintln!("Not logged in");
    }
    Ok(())
}

pub(crate) fn cmd_whoami(app: &App, json: bool) -> Result<()> {
    let Some(session) = app.session() else {
        if json {
            println!("{}", serde_json::json!({ "user": null }));
        } else {
            eprintln!("Not logged in");
        }
        process::exit(2);
    };
    if json {
        let out = serde_json::json!({ "user": session.user, "expires_at": session.expires_at });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{} ({})", session.user.email, session.user.id);
        if let Some(expires) = session.expires_at {
            println!("Session expires {}", expires.format("%Y-%m-%d %H:%M UTC"));
        }
    }
    Ok(())
}
