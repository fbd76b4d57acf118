// Lunax - local-first journal store
// Entry point and command dispatch

use anyhow::Context;
use clap::Parser;
use lunax::app::{self, AppState};
use lunax::cli::{Cli, Commands, SettingsCommands};
use lunax::commands;
use lunax::config::Config;
use lunax::database::Entry;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lunax=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match cli.data_dir {
        Some(dir) => Config {
            data_dir: dir,
            ..Config::from_env()
        },
        None => Config::from_env(),
    };

    let state = app::global(config)
        .await
        .context("Failed to open the journal")?;

    run(state, cli.command).await
}

async fn run(state: &AppState, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Export { out } => {
            let path = commands::export_journal(state, out).await?;
            println!("{}", path.display());
        }
        Commands::Import { file } => {
            let report = commands::import_journal(state, &file)
                .await
                .with_context(|| format!("Failed to import {}", file.display()))?;

            println!(
                "Imported {} entries and {} attachments{}",
                report.imported_entries,
                report.imported_blobs,
                if report.remapped {
                    " (some ids were remapped)"
                } else {
                    ""
                }
            );
            for skipped in &report.skipped {
                println!("  skipped {} #{}: {}", skipped.kind, skipped.position, skipped.reason);
            }
        }
        Commands::List(args) => {
            let entries = commands::list_entries(state, args.filter()?).await?;
            for entry in &entries {
                print_entry(entry);
            }
        }
        Commands::New {
            title,
            tags,
            category,
        } => {
            let entry = commands::create_entry(state, title, tags, category).await?;
            println!("{}", entry.id);
        }
        Commands::Attach {
            entry_id,
            file,
            mime,
        } => {
            let reference = commands::attach_file(state, &entry_id, &file, mime)
                .await
                .with_context(|| format!("Failed to attach {}", file.display()))?;
            println!("{}", reference.id);
        }
        Commands::Settings { action } => {
            let settings = match action {
                SettingsCommands::Show => commands::get_settings(state).await?,
                SettingsCommands::Set(args) => {
                    commands::update_settings(state, args.into_patch()).await?
                }
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Commands::Info => {
            println!("{}", serde_json::to_string_pretty(&commands::get_app_info(state))?);
        }
    }

    Ok(())
}

fn print_entry(entry: &Entry) {
    let day = chrono::DateTime::from_timestamp_millis(entry.date_for_entry)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "?".to_string());

    let mut flags = String::new();
    if entry.is_favorite {
        flags.push('*');
    }
    if entry.is_locked {
        flags.push('L');
    }

    let tags = if entry.tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", entry.tags.join(", "))
    };

    println!("{}  {}  {:2} {}{}", entry.id, day, flags, entry.title, tags);
}
