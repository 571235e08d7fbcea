//! Loopback run of the audio subsystem
//!
//! Run: cargo run --bin toxphone-loopback -- --config audio.json --seconds 5
//!
//! The report goes to stdout as JSON. A failure prints its `ErrorContext`
//! to stderr as JSON and exits non-zero.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use toxphone_audio::config::{AudioConfig, ConfigManager};
use toxphone_audio::loopback::{run_loopback, LoopbackReport};
use toxphone_audio::utils::{init_logging, AppResult};

#[derive(Parser, Debug)]
#[command(author, version, about = "Synthetic call through the record and voice buffers", long_about = None)]
struct Args {
    /// JSON configuration file; defaults are used when missing
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// How long the call runs, in seconds
    #[arg(short, long, default_value = "2.0", value_parser = parse_seconds)]
    seconds: Duration,
}

fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let seconds: f64 = raw
        .parse()
        .map_err(|e| format!("invalid duration '{}': {}", raw, e))?;
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("duration out of range: {}", e))
}

fn run(args: &Args) -> AppResult<LoopbackReport> {
    let config = match &args.config {
        Some(path) => ConfigManager::load_or_default(path)?,
        None => AudioConfig::default(),
    };
    run_loopback(&config, args.seconds)
}

fn main() -> Result<ExitCode> {
    init_logging();
    let args = Args::parse();

    match run(&args) {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(code = ?e.code(), "Loopback failed: {}", e);
            eprintln!("{}", serde_json::to_string_pretty(&e.context())?);
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["toxphone-loopback"]).unwrap();
        assert!(args.config.is_none());
        assert_eq!(args.seconds, Duration::from_secs(2));
    }

    #[test]
    fn test_args_config_and_seconds() {
        let args =
            Args::try_parse_from(["toxphone-loopback", "--config", "audio.json", "-s", "0.5"])
                .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("audio.json")));
        assert_eq!(args.seconds, Duration::from_millis(500));
    }

    #[test]
    fn test_args_reject_bad_seconds() {
        assert!(Args::try_parse_from(["toxphone-loopback", "--seconds", "soon"]).is_err());
        assert!(Args::try_parse_from(["toxphone-loopback", "--seconds", "-1"]).is_err());
    }

    #[test]
    fn test_run_reports_invalid_config_context() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("audio.json");
        std::fs::write(&path, "{ not json").unwrap();

        let args = Args {
            config: Some(path),
            seconds: Duration::from_millis(10),
        };
        let ctx = run(&args).unwrap_err().context();
        assert_eq!(ctx.code, toxphone_audio::utils::ErrorCode::ConfigParseFailed);
        assert!(!ctx.recoverable);
        assert!(ctx.detail.is_some());
    }
}
