//! Shared helpers for the command-line driver: logger setup and output locations.

use std::error::Error;
use std::path::{Path, PathBuf};

use pursuit::sim::Algorithm;

/// Parse a `--log-level` value (off, error, warn, info, debug, trace), case-insensitively.
pub fn parse_log_level(log_level: &str) -> Result<log::LevelFilter, Box<dyn Error>> {
    log_level
        .trim()
        .parse::<log::LevelFilter>()
        .map_err(|_| format!("invalid log level '{}'", log_level).into())
}

/// Set up logging for a simulation run.
///
/// Records go to stderr, or are appended to `log_file` when given. Each line carries the local
/// time, the level and the emitting module, e.g. `2026-01-01 12:00:00.000 [DEBUG pursuit::bandit] ...`,
/// so per-round fusion traces can be told apart from the driver's progress messages.
/// `RUST_LOG` directives are applied on top of `log_level`.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let mut builder = env_logger::Builder::new();
    builder.filter_level(parse_log_level(log_level)?);
    builder.parse_default_env();
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{} {}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.module_path().unwrap_or("pursuit-sim"),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    Ok(())
}

/// Create the output directory if it does not exist yet.
///
/// # Errors
/// Returns an error if the path exists but is not a directory, or if creation fails.
pub fn validate_output_path(output: &Path) -> Result<(), Box<dyn Error>> {
    if output.exists() && !output.is_dir() {
        return Err(format!("Output path '{}' is not a directory.", output.display()).into());
    }
    if !output.exists() {
        std::fs::create_dir_all(output)?;
    }
    Ok(())
}

/// `<output>/<algorithm>_episode.csv`
pub fn episode_csv_path(output: &Path, algorithm: Algorithm) -> PathBuf {
    output.join(format!("{}_episode.csv", algorithm.name()))
}

/// `<output>/<algorithm>_summary.csv`
pub fn summary_csv_path(output: &Path, algorithm: Algorithm) -> PathBuf {
    output.join(format!("{}_summary.csv", algorithm.name()))
}
