use preload::cli::Args;
use preload::config::PreloadConfig;
use preload::core::{Callback, PreloadOptions, Registry, Status};
use preload::engines::FileEngine;
use preload::paths::{self, CONFIG_FILE, LOG_FILE};
use preload::server::ApiServer;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often the CLI re-checks session status while waiting.
const WAIT_STEP: Duration = Duration::from_millis(50);

fn init_logging(args: &Args, path_config: &paths::PathConfig) -> Result<()> {
    // Determine log level based on verbosity flags
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        // File logging with specified verbosity level
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| paths::data_file(LOG_FILE, path_config));

        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!(
            "Logging to file: {} (level: {:?})",
            log_path.display(),
            log_level
        );
    } else {
        // Console logging with specified verbosity level (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

/// Block until every locator is Cached, Error or gone (or the deadline passes).
fn wait_settled(registry: &Registry<FileEngine>, locators: &[String], timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let pending = locators.iter().any(|l| {
            matches!(
                registry.info_or_default(l).status,
                Status::Loading | Status::Ready
            )
        });
        if !pending {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(WAIT_STEP);
    }
}

fn print_sessions(registry: &Registry<FileEngine>, locators: &[String]) {
    println!(
        "{:<8} {:>12} {:>12} {:>12} {:>5}  LOCATOR",
        "STATUS", "FW_BYTES", "TOTAL", "SIZE", "EOF"
    );
    for locator in locators {
        let snap = registry.info_or_default(locator);
        println!(
            "{:<8} {:>12} {:>12} {:>12} {:>5}  {}",
            format!("{:?}", snap.status).to_lowercase(),
            snap.fw_bytes,
            snap.total_bytes,
            snap.file_size,
            snap.eof_cached,
            locator
        );
    }
}

fn claim_all(registry: &Registry<FileEngine>, locators: &[String]) {
    for locator in locators {
        let Some(mut claimed) = registry.claim(locator) else {
            println!("{}: nothing to claim", locator);
            continue;
        };
        let buffered = claimed.progress().fw_bytes;
        let mut sink = Vec::new();
        match claimed.source_mut().read_to_end(&mut sink) {
            Ok(read) => println!(
                "{}: claimed with {} bytes buffered, read {} bytes",
                locator, buffered, read
            ),
            Err(e) => println!("{}: claimed, read failed: {}", locator, e),
        }
    }
}

fn main() -> Result<()> {
    // Parse command-line arguments first (needed for log setup)
    let args = Args::parse();

    // Create path configuration from CLI args and environment
    let path_config = paths::PathConfig::from_env_and_cli(args.config_dir.clone());

    // Ensure directories exist
    if let Err(e) = paths::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }

    init_logging(&args, &path_config)?;

    info!("Preload starting...");
    debug!("Command-line args: {:?}", args);

    let config_path = paths::config_file(CONFIG_FILE, &path_config);
    info!("Config path: {}", config_path.display());
    let config = PreloadConfig::load_or_default(&config_path)?;

    if args.write_config {
        config.save(&config_path)?;
        println!("{}", config_path.display());
        return Ok(());
    }

    if args.locators.is_empty() && args.serve.is_none() {
        use clap::CommandFactory;
        let mut cmd = Args::command();
        let _ = cmd.print_help();
        println!();
        return Ok(());
    }

    let engine = Arc::new(FileEngine::with_chunk_size(config.chunk_size));
    let registry = Arc::new(
        Registry::new(engine, config.registry()).context("Failed to start status notifier")?,
    );

    let callback: Callback = Arc::new(|locator: &str, snap: &preload::Snapshot| {
        info!(
            "{} -> {:?} (fw {} / size {})",
            locator, snap.status, snap.fw_bytes, snap.file_size
        );
    });
    registry.set_callback(Some(callback));

    let options = PreloadOptions::new(args.max_bytes, args.readahead_secs);
    for locator in &args.locators {
        if let Err(e) = registry.start(locator, options) {
            warn!("Cannot preload {}: {}", locator, e);
        }
    }
    if args.locators.len() > registry.capacity() {
        warn!(
            "{} locators requested, only the last {} stay active",
            args.locators.len(),
            registry.capacity()
        );
    }

    if let Some(port) = args.serve {
        let port = port.unwrap_or(config.api_port);
        let handle = ApiServer::start(port, Arc::clone(&registry))
            .context("Failed to spawn API server thread")?;
        println!("Serving on http://0.0.0.0:{}", port);
        if handle.join().is_err() {
            anyhow::bail!("API server thread panicked");
        }
        return Ok(());
    }

    let timeout = Duration::from_secs_f64(args.timeout_secs.clamp(0.0, 86_400.0));
    if !wait_settled(&registry, &args.locators, timeout) {
        warn!("Timed out after {:?} waiting for sessions", timeout);
    }
    print_sessions(&registry, &args.locators);

    if args.claim {
        claim_all(&registry, &args.locators);
    }

    registry.notifier().flush(Duration::from_secs(1));
    registry.clear_all();
    Ok(())
}
