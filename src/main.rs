//! toolrelay CLI entry point

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use toolrelay::agent::events::StreamEvent;
use toolrelay::agent::session::{CORRELATION_PARAM, MODEL_PARAM};
use toolrelay::{config, ui, Engine};

#[derive(Parser)]
#[command(name = "toolrelay")]
#[command(about = "Streaming tool orchestration for OpenAI-compatible models")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.toolrelay/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Chat with the engine
    Chat {
        /// Message to send; omit for an interactive loop
        #[arg(short, long)]
        message: Option<String>,

        /// Model profile id
        #[arg(long)]
        model: Option<String>,

        /// Correlation id passed to tool servers
        #[arg(long)]
        msid: Option<i64>,
    },

    /// List selectable model profiles
    Models,

    /// List discovered tools grouped by server
    Tools,

    /// Show engine status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(config::config_path);

    match cli.command {
        Commands::Init { force } => {
            if config_path.exists() && !force {
                ui::print_warning(&format!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                ));
                return Ok(());
            }
            config::save_to(&config_path, &config::template())?;
            ui::print_success(&format!("Wrote {}", config_path.display()));
            println!("\nNext steps:");
            println!("  1. Add your API key to the profile, or set OPENAI_API_KEY");
            println!("  2. Point \"servers\" at your MCP endpoints");
            println!("  3. Chat: toolrelay chat -m \"Hello!\"");
        }

        Commands::Chat {
            message,
            model,
            msid,
        } => {
            let engine = build_engine(&config_path).await?;

            let mut params = HashMap::new();
            if let Some(model) = model {
                params.insert(MODEL_PARAM.to_string(), model);
            }
            if let Some(msid) = msid {
                params.insert(CORRELATION_PARAM.to_string(), msid.to_string());
            }
            let session = engine.open_session(&params);

            let profile = engine
                .profiles()
                .resolve(session.selected_profile_id.as_deref());
            ui::print_header(profile.display_label(), &session.session_id);

            match message {
                Some(msg) => run_once(&engine, &session.session_id, &msg).await?,
                None => run_interactive(&engine, &session.session_id).await?,
            }
        }

        Commands::Models => {
            let engine = build_engine(&config_path).await?;
            ui::print_models(&engine.list_models());
        }

        Commands::Tools => {
            let engine = build_engine(&config_path).await?;
            ui::print_catalog(&engine.describe_tools());
        }

        Commands::Status => {
            let engine = build_engine(&config_path).await?;
            println!("{}", serde_json::to_string_pretty(&engine.status())?);
        }
    }

    Ok(())
}

async fn build_engine(path: &std::path::Path) -> Result<Engine> {
    let config = config::load(Some(path)).context("failed to load configuration")?;
    let engine = Engine::from_config(&config)
        .await
        .context("failed to start engine")?;
    Ok(engine)
}

async fn run_once(engine: &Engine, session_id: &str, message: &str) -> Result<()> {
    let rx = engine.start_turn(session_id, message);
    drain(rx).await;
    Ok(())
}

async fn run_interactive(engine: &Engine, session_id: &str) -> Result<()> {
    use std::io::{self, Write};

    println!("Interactive mode (type 'exit' to quit, Ctrl+C cancels a turn)\n");
    loop {
        print!("\x1b[1;34mYou\x1b[0m: ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("Bye!");
            break;
        }
        if input.is_empty() {
            continue;
        }

        run_once(engine, session_id, input).await?;
    }

    Ok(())
}

/// Print events until the turn ends. Ctrl+C drops the receiver, which
/// stops the turn at its next emission.
async fn drain(mut rx: mpsc::Receiver<StreamEvent>) {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => ui::print_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                ui::print_warning("Turn cancelled");
                break;
            }
        }
    }
}
