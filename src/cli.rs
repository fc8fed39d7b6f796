use clap::Parser;
use std::path::PathBuf;

// Build version with target info
const VERSION_INFO: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nEngine: local files (file:// or path)"
);

/// Bounded media prefetch registry
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Locators to preload (paths or file:// URLs). Only the last `capacity` stay active.
    #[arg(value_name = "LOCATOR")]
    pub locators: Vec<String>,

    /// Read-ahead byte target per session (0 = config default)
    #[arg(short = 'b', long = "max-bytes", value_name = "BYTES", default_value_t = 0)]
    pub max_bytes: u64,

    /// Read-ahead duration target in seconds (<= 0 = config default)
    #[arg(short = 'r', long = "readahead", value_name = "SECS", default_value_t = 0.0)]
    pub readahead_secs: f64,

    /// Claim every session after waiting and drain it to report how many bytes were read
    #[arg(long = "claim")]
    pub claim: bool,

    /// Seconds to wait for sessions to settle (Cached or Error)
    #[arg(short = 't', long = "timeout", value_name = "SECS", default_value_t = 10.0)]
    pub timeout_secs: f64,

    /// Run the REST API server (default port from config)
    #[arg(short = 's', long = "serve", value_name = "PORT")]
    pub serve: Option<Option<u16>>,

    /// Enable debug logging to file (default: preload.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Write the effective configuration to preload.json and exit
    #[arg(long = "write-config")]
    pub write_config: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["preload", "a.mp4", "file:///tmp/b.mkv"]);
        assert_eq!(args.locators, vec!["a.mp4", "file:///tmp/b.mkv"]);
        assert_eq!(args.max_bytes, 0);
        assert!(!args.claim);
        assert!(args.serve.is_none());
        assert!(args.log_file.is_none());
        assert_eq!(args.verbosity, 0);
    }

    #[test]
    fn test_optional_values() {
        let args = Args::parse_from(["preload", "--serve", "-l", "-vv"]);
        assert_eq!(args.serve, Some(None));
        assert_eq!(args.log_file, Some(None));
        assert_eq!(args.verbosity, 2);

        let args = Args::parse_from(["preload", "--serve", "9000", "--max-bytes", "4096"]);
        assert_eq!(args.serve, Some(Some(9000)));
        assert_eq!(args.max_bytes, 4096);
    }
}
