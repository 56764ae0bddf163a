use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use feedme::config::Config;
use feedme::feed::{self, build_client};
use feedme::launcher::MediaLauncher;
use feedme::library::{Library, LibraryOptions};
use feedme::storage::{Episode, Store};
use feedme::util::{clean_summary, strip_control_chars, truncate_to_width};

/// Column budget for titles in listings
const TITLE_WIDTH: usize = 72;

/// Get the config directory path (~/.config/feedme/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedme"))
}

/// SEC-007: Restrict the config directory to the current user.
#[cfg(unix)]
fn restrict_permissions(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(dir) {
        Ok(metadata) => {
            let mut perms = metadata.permissions();
            perms.set_mode(0o700);
            if let Err(e) = std::fs::set_permissions(dir, perms) {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to set config directory permissions to 0700");
            }
        }
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "Failed to read config directory metadata");
        }
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_dir: &Path) {}

#[derive(Parser, Debug)]
#[command(name = "feedme", version, about = "Podcast subscriptions with read tracking")]
struct Args {
    /// Config file (default: ~/.config/feedme/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Subscription store (overrides store_path from the config file)
    #[arg(long, value_name = "FILE", global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List subscriptions ("*" marks unread episodes)
    List,
    /// List a subscription's episodes, newest first
    Episodes { name: String },
    /// Show an episode's details and mark it read
    Show { name: String, index: usize },
    /// Subscribe to a feed
    Add { name: String, url: String },
    /// Remove a subscription
    Delete { name: String },
    /// Fetch feeds and merge new episodes (all subscriptions unless NAME is given)
    Refresh { name: Option<String> },
    /// Import subscriptions from an OPML file, replacing same-named entries
    Import { file: PathBuf },
    /// Mark an episode read (or unread)
    Mark {
        name: String,
        index: usize,
        #[arg(long)]
        unread: bool,
    },
    /// Play an episode's media in the configured player
    Play { name: String, index: usize },
    /// Download an episode's media with the configured downloader
    Download {
        name: String,
        index: usize,
        /// Destination directory
        #[arg(long, value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }
    restrict_permissions(&config_dir);

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let store_path = args
        .store
        .clone()
        .unwrap_or_else(|| config.resolve_store_path(&config_dir));
    let store = Store::new(store_path, config.max_episodes);
    let client = build_client(config.fetch_timeout()).context("Failed to create HTTP client")?;
    let library = Library::open(store, client, LibraryOptions::from_config(&config)).await;
    let launcher = MediaLauncher::new(config.player.clone(), config.downloader.clone());

    run(args.command, &library, &launcher).await
}

async fn run(command: Command, library: &Library, launcher: &MediaLauncher) -> Result<()> {
    match command {
        Command::List => {
            let subscriptions = library.subscriptions().await;
            if subscriptions.is_empty() {
                println!("No subscriptions. Add one with `feedme add <NAME> <URL>` or `feedme import <FILE>`.");
            }
            for sub in subscriptions {
                let marker = if sub.has_unread() { " *" } else { "" };
                println!("{}{}", strip_control_chars(&sub.name), marker);
            }
        }
        Command::Episodes { name } => {
            let episodes = library.episodes(&name).await?;
            if episodes.is_empty() {
                println!("No episodes yet. Run `feedme refresh` to fetch them.");
            }
            for (index, episode) in episodes.iter().enumerate() {
                let status = if episode.read { ' ' } else { '*' };
                let title = strip_control_chars(&episode.title);
                println!(
                    "{:>3} {} {}  {}",
                    index,
                    status,
                    strip_control_chars(&episode.published),
                    truncate_to_width(&title, TITLE_WIDTH)
                );
            }
        }
        Command::Show { name, index } => {
            let episode = library.select_episode(&name, index).await?;
            print_details(&episode);
            library.wait_for_pending_mark().await;
        }
        Command::Add { name, url } => {
            library.add_subscription(&name, &url).await?;
            println!("Added '{}'. Run `feedme refresh` to fetch episodes.", name.trim());
        }
        Command::Delete { name } => {
            let removed = library.delete_subscription(&name).await?;
            println!("Deleted '{}' ({} episodes).", name, removed.episodes.len());
        }
        Command::Refresh { name } => {
            let summary = match name {
                Some(name) => library.refresh_subscription(&name).await?,
                None => library.refresh().await.context("Failed to save refreshed subscriptions")?,
            };
            println!(
                "Updated {} feed(s), {} new episode(s).",
                summary.updated.len(),
                summary.new_episodes
            );
            for (name, error) in &summary.failed {
                eprintln!("  {}: {}", strip_control_chars(name), strip_control_chars(error));
            }
            if !summary.failed.is_empty() {
                eprintln!("{} feed(s) failed and kept their previous episodes.", summary.failed.len());
            }
        }
        Command::Import { file } => {
            let entries = feed::import_file(&file)
                .await
                .with_context(|| format!("Failed to import {}", file.display()))?;
            if entries.is_empty() {
                println!("No feeds found in {}.", file.display());
                return Ok(());
            }
            let summary = library
                .import(entries)
                .await
                .context("Failed to save imported subscriptions")?;
            println!(
                "Imported {} feed(s) ({} new, {} replaced).",
                summary.added + summary.overwritten,
                summary.added,
                summary.overwritten
            );
        }
        Command::Mark { name, index, unread } => {
            library.toggle_read(&name, index, !unread).await?;
        }
        Command::Play { name, index } => {
            let episode = library.episode(&name, index).await?;
            let launched = launcher.play(&episode)?;
            println!("Playing with {} (pid {}).", launched.program, launched.pid);
        }
        Command::Download { name, index, dir } => {
            let episode = library.episode(&name, index).await?;
            let launched = launcher.download(&episode, &dir)?;
            if let Some(destination) = launched.destination {
                println!("Downloading to {}.", destination.display());
            }
        }
    }
    Ok(())
}

fn print_details(episode: &Episode) {
    println!("Title: {}", strip_control_chars(&episode.title));
    println!("Published: {}", strip_control_chars(&episode.published));
    let link = if episode.link.is_empty() { "No Link" } else { &episode.link };
    println!("Link: {}", strip_control_chars(link));
    println!();
    println!("Summary:");
    println!("{}", strip_control_chars(&clean_summary(&episode.summary)));
    println!();
    if episode.enclosures.is_empty() {
        println!("No media attachments found.");
    } else {
        println!("Media attachments:");
        for enclosure in &episode.enclosures {
            let media_type = if enclosure.media_type.is_empty() {
                "unknown type"
            } else {
                &enclosure.media_type
            };
            println!(
                "   Type: {} URL: {}",
                strip_control_chars(media_type),
                strip_control_chars(&enclosure.href)
            );
        }
    }
}
