//! Command-line argument parsing and configuration.
//!
//! Supports:
//! - CLI arguments via clap
//! - TOML session configuration file
//! - Merging CLI with file config (CLI takes precedence)

use anyhow::Result;
use clap::Parser;
use peerlink::{Channel, SessionConfig};
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG: &str = "peerlink.toml";

/// peerlink - run two in-process peers and exercise a session between them.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about)]
#[command(propagate_version = true)]
pub struct Args {
    /// Files alice sends to bob.
    pub files: Vec<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv).
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Session configuration (TOML). Defaults to ./peerlink.toml when present.
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Fragment size in bytes.
    #[clap(long)]
    pub chunk_size: Option<usize>,

    /// Buffered-amount threshold in bytes.
    #[clap(long)]
    pub buffer_threshold: Option<usize>,

    /// Chat message alice sends to bob.
    #[clap(short, long)]
    pub message: Option<String>,

    /// Place a call on this media channel (audio, video, screen, sound).
    #[clap(long)]
    pub call: Option<Channel>,

    /// Where bob stores received files.
    #[clap(short, long, default_value = "received")]
    pub output: PathBuf,

    /// Also append logs to this file.
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Give up on outstanding work after this many seconds.
    #[clap(long, default_value_t = 60)]
    pub timeout_secs: u64,
}

impl Args {
    /// Parse the command line. Relative paths are resolved against the
    /// current directory.
    pub fn load() -> Self {
        let mut args = Args::parse();
        args.config = args.config.map(Self::resolve_path);
        args.output = Self::resolve_path(args.output);
        args.log_file = args.log_file.map(Self::resolve_path);
        args
    }

    /// Resolve a potentially relative path to an absolute one.
    fn resolve_path(p: PathBuf) -> PathBuf {
        if p.is_absolute() {
            p
        } else {
            std::env::current_dir().unwrap_or_default().join(p)
        }
    }

    /// Session configuration from the TOML file (if any) with CLI overrides.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let file = match &self.config {
            Some(path) => Some(SessionConfig::from_file(path)?),
            None => {
                let default = Path::new(DEFAULT_CONFIG);
                if default.exists() {
                    Some(SessionConfig::from_file(default)?)
                } else {
                    None
                }
            }
        };
        Ok(self.merge(file.unwrap_or_default()))
    }

    /// Merge file config with CLI args (CLI takes precedence).
    fn merge(&self, mut file: SessionConfig) -> SessionConfig {
        if let Some(chunk_size) = self.chunk_size.filter(|&c| c > 0) {
            file.chunk_size = chunk_size;
        }
        if let Some(threshold) = self.buffer_threshold {
            file.buffer_threshold = threshold;
        }
        file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_file() {
        let args = Args::parse_from(["peerlink", "--chunk-size", "1024", "a.txt", "b.txt"]);
        let file = SessionConfig {
            chunk_size: 4096,
            buffer_threshold: 2048,
            ..SessionConfig::default()
        };
        let merged = args.merge(file);
        assert_eq!(merged.chunk_size, 1024);
        assert_eq!(merged.buffer_threshold, 2048);
        assert_eq!(args.files.len(), 2);
    }

    #[test]
    fn test_call_channel_parses() {
        let args = Args::parse_from(["peerlink", "--call", "video", "-vv"]);
        assert_eq!(args.call, Some(Channel::Video));
        assert_eq!(args.verbose, 2);
        assert!(Args::try_parse_from(["peerlink", "--call", "hologram"]).is_err());
    }
}
