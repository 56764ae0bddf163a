//! External media player and downloader invocation.
//!
//! Media addresses come from feeds, so they are untrusted: they are validated
//! as http(s) URLs and always passed as discrete argv entries, never through a
//! shell. Launched processes are detached and not awaited.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

use crate::storage::Episode;
use crate::util::validate_feed_url;

/// Destination file name used when the media URL has no usable last segment.
const FALLBACK_FILE_NAME: &str = "episode.bin";

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Episode has no playable media")]
    NoMedia,

    /// SEC: Media address rejected before reaching the external program.
    #[error("Refusing to launch media address '{href}': {reason}")]
    InvalidAddress { href: String, reason: String },

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Program and leading arguments for an external tool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn default_player() -> Self {
        Self::new("mpv", ["--force-window=yes"])
    }
}

/// Downloader program plus the option that names the output file.
///
/// Long options (`--output-document`) are joined to the path with `=`;
/// short ones (`-o`) are passed as a separate argument.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DownloaderSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_output_arg")]
    pub output_arg: String,
}

fn default_output_arg() -> String {
    "--output-document".to_string()
}

impl Default for DownloaderSpec {
    fn default() -> Self {
        Self {
            program: "wget".to_string(),
            args: Vec::new(),
            output_arg: default_output_arg(),
        }
    }
}

/// A process that was started successfully.
#[derive(Debug, Clone)]
pub struct Launched {
    pub program: String,
    pub pid: u32,
    /// Where a download is being written; `None` for playback.
    pub destination: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct MediaLauncher {
    player: CommandSpec,
    downloader: DownloaderSpec,
}

impl Default for MediaLauncher {
    fn default() -> Self {
        Self::new(CommandSpec::default_player(), DownloaderSpec::default())
    }
}

impl MediaLauncher {
    pub fn new(player: CommandSpec, downloader: DownloaderSpec) -> Self {
        Self { player, downloader }
    }

    /// Starts the player on the episode's first enclosure.
    pub fn play(&self, episode: &Episode) -> Result<Launched, LaunchError> {
        let href = media_of(episode)?;
        let command = self.play_command(href)?;
        let launched = spawn_detached(command, None)?;
        tracing::info!(program = %launched.program, pid = launched.pid, href = %href, "Started player");
        Ok(launched)
    }

    /// Starts the downloader on the episode's first enclosure, writing into `dir`.
    pub fn download(&self, episode: &Episode, dir: &Path) -> Result<Launched, LaunchError> {
        let href = media_of(episode)?;
        let (command, destination) = self.download_command(href, dir)?;
        let launched = spawn_detached(command, Some(destination))?;
        tracing::info!(
            program = %launched.program,
            pid = launched.pid,
            href = %href,
            destination = ?launched.destination,
            "Started download"
        );
        Ok(launched)
    }

    /// Builds the player invocation without running it.
    pub fn play_command(&self, href: &str) -> Result<Command, LaunchError> {
        let url = checked_address(href)?;
        let mut command = Command::new(&self.player.program);
        command.args(&self.player.args).arg(url);
        Ok(command)
    }

    /// Builds the downloader invocation without running it, returning the
    /// destination path alongside.
    pub fn download_command(&self, href: &str, dir: &Path) -> Result<(Command, PathBuf), LaunchError> {
        let url = checked_address(href)?;
        let destination = dir.join(file_name_for(&url));

        let mut command = Command::new(&self.downloader.program);
        command.args(&self.downloader.args);
        let output_arg = &self.downloader.output_arg;
        if output_arg.starts_with("--") {
            let mut joined = std::ffi::OsString::from(format!("{}=", output_arg));
            joined.push(destination.as_os_str());
            command.arg(joined);
        } else {
            command.arg(output_arg).arg(&destination);
        }
        command.arg(url.as_str());

        Ok((command, destination))
    }
}

fn media_of(episode: &Episode) -> Result<&str, LaunchError> {
    episode.primary_media().ok_or(LaunchError::NoMedia)
}

/// SEC: Only absolute http(s) URLs reach the external program, so a feed
/// cannot smuggle in option-like arguments such as `--script=...`.
fn checked_address(href: &str) -> Result<String, LaunchError> {
    validate_feed_url(href)
        .map(|url| url.to_string())
        .map_err(|e| LaunchError::InvalidAddress {
            href: href.to_string(),
            reason: e.to_string(),
        })
}

/// Last non-empty path segment of `url`, or [`FALLBACK_FILE_NAME`].
fn file_name_for(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string))
        })
        .filter(|name| name != "." && name != "..")
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

fn spawn_detached(mut command: Command, destination: Option<PathBuf>) -> Result<Launched, LaunchError> {
    let program = command.get_program().to_string_lossy().into_owned();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // Own process group: Ctrl-C in the terminal does not reach the child
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command.spawn().map_err(|source| {
        tracing::warn!(program = %program, error = %source, "Failed to start external program");
        LaunchError::Spawn {
            program: program.clone(),
            source,
        }
    })?;

    Ok(Launched {
        program,
        pid: child.id(),
        destination,
    })
}
