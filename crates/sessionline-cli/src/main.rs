//! sessionline - sign in to a backend and make authenticated requests from
//! the terminal.
//!
//! The access token lives only for the duration of one command. Later
//! commands recover the session from the stored refresh token.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionline_core::auth::{NoticeLevel, SessionEvent};
use sessionline_core::config::APP_NAME;
use sessionline_core::{ApiRequest, Config, LoginRequest, Session};

const USAGE: &str = "\
Usage: sessionline <command>

Commands:
  login [email] [--redirect <path>]   Sign in (password is prompted)
  logout                              Sign out and forget stored credentials
  whoami                              Restore the session and print the identity
  get <path>                          GET an API path and print the JSON result
  delete <path>                       DELETE an API path and print the JSON result";

fn log_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join(APP_NAME).join("logs"))
}

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=sessionline_core=debug).
/// A daily log file is written alongside stderr when a cache dir exists.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sessionline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let config = Config::load()?;
    let (session, mut events) = Session::connect(config)?;
    info!(command = %command, "sessionline starting");

    let result = run(&session, command, &args[1..]).await;
    print_events(&mut events);
    result
}

async fn run(session: &Session, command: &str, rest: &[String]) -> Result<()> {
    match command {
        "login" => login(session, rest).await,
        "logout" => {
            session.logout(false).await;
            Ok(())
        }
        "whoami" => match session.restore_session().await? {
            Some(identity) => {
                println!("{}", serde_json::to_string_pretty(&identity)?);
                Ok(())
            }
            None => bail!("Not signed in. Run `sessionline login` first."),
        },
        "get" | "delete" => {
            let path = rest.first().context("Missing <path> argument")?;
            let request = if command == "get" {
                ApiRequest::get(path.as_str())
            } else {
                ApiRequest::delete(path.as_str())
            };
            let payload: Value = session.client().request(&request).await?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command `{}`\n\n{}", other, USAGE),
    }
}

async fn login(session: &Session, rest: &[String]) -> Result<()> {
    let mut email = None;
    let mut redirect = None;
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--redirect" => redirect = Some(iter.next().context("--redirect needs a path")?.clone()),
            _ => email = Some(arg.clone()),
        }
    }

    let email = match email {
        Some(email) => email,
        None => prompt_email()?,
    };
    let password = rpassword::prompt_password("Password: ")?;
    if email.is_empty() || password.is_empty() {
        bail!("Email and password required");
    }

    let identity = session.login(LoginRequest::new(email, password), redirect).await?;
    println!("Signed in as {} ({})", identity.display_name, identity.user_id);
    Ok(())
}

fn prompt_email() -> Result<String> {
    print!("Email: ");
    io::stdout().flush()?;

    let mut email = String::new();
    io::stdin().read_line(&mut email)?;
    Ok(email.trim().to_string())
}

/// Render what the session asked the host to do.
fn print_events(events: &mut UnboundedReceiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Notify(notice) => {
                let tag = match notice.level {
                    NoticeLevel::Success => "ok",
                    NoticeLevel::Warning => "warning",
                    NoticeLevel::Error => "error",
                };
                match notice.description {
                    Some(description) => eprintln!("[{}] {}: {}", tag, notice.title, description),
                    None => eprintln!("[{}] {}", tag, notice.title),
                }
            }
            SessionEvent::Navigate(nav) => eprintln!("-> {}", nav.url()),
            SessionEvent::LoginExpired(true) => {
                eprintln!("Login expired. Run `sessionline login` to continue.")
            }
            SessionEvent::LoginExpired(false) | SessionEvent::StateReset => {}
        }
    }
}
