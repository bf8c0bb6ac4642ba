use anyhow::{Context, Result};
use clap::{Arg, Command};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod app;
mod backend;
mod config;
mod store;

use app::App;
use config::{Config, Settings};

fn init_tracing() {
    // Diagnostics go to stderr; the chat itself stays on stdout.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let matches = Command::new("tidechat")
        .version("0.4.0")
        .author("Tidechat Team")
        .about("Terminal client for realtime Postgres-backed chat services")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("Path to the config file"),
        )
        .arg(
            Arg::new("url")
                .long("url")
                .value_name("URL")
                .help("Row service base URL"),
        )
        .arg(
            Arg::new("api-key")
                .long("api-key")
                .value_name("KEY")
                .help("Service API key"),
        )
        .arg(
            Arg::new("token")
                .long("token")
                .value_name("JWT")
                .help("Access token of the signed-in user"),
        )
        .arg(
            Arg::new("user-id")
                .long("user-id")
                .value_name("UUID")
                .help("Authenticated user id"),
        )
        .arg(
            Arg::new("name")
                .long("name")
                .value_name("NAME")
                .help("Display name"),
        )
        .arg(
            Arg::new("conversation")
                .short('c')
                .long("conversation")
                .value_name("UUID")
                .help("Auto-open a conversation on startup"),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let file = Config::load(&config_path)?;

    let settings = Settings {
        url: matches
            .get_one::<String>("url")
            .cloned()
            .or(file.url)
            .context("no service URL; pass --url or set url in the config file")?,
        api_key: matches
            .get_one::<String>("api-key")
            .cloned()
            .or(file.api_key)
            .context("no API key; pass --api-key or set api_key in the config file")?,
        token: matches
            .get_one::<String>("token")
            .cloned()
            .or(file.token)
            .unwrap_or_default(),
        user_id: matches
            .get_one::<String>("user-id")
            .map(|s| s.parse().context("invalid --user-id"))
            .transpose()?
            .or(file.user_id),
        name: matches.get_one::<String>("name").cloned().or(file.name),
        handle: file.handle,
    };

    let mut app = App::new(settings)?;

    if let Some(conversation) = matches.get_one::<String>("conversation") {
        app.handle_line(&format!("/open {conversation}")).await?;
    }

    run_app(&mut app).await
}

async fn run_app(app: &mut App) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => app.handle_line(&line).await?,
                None => app.should_quit = true,
            },
            _ = tick.tick() => app.on_tick().await?,
        }

        if app.should_quit {
            break;
        }
    }

    app.shutdown().await;
    Ok(())
}
