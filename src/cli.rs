//! Command-line interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::filter::LevelFilter;

use crate::config::{ConfigLoader, LabConfig};
use crate::corpus::load_training_data;
use crate::error::{LabError, Result};
use crate::preview::{self, DatasetStats};
use crate::trainer::{prepare_datasets, Trainer};
use crate::transform::TransformOptions;

/// Prepare session logs as fine-tuning data and drive LoRA runs.
#[derive(Debug, Parser)]
#[command(name = "sft-lab", author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Default log level; `RUST_LOG` refines it.
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    pub log_level: LogLevel,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Preview training examples built from session files.
    Check(CheckArgs),

    /// Validate a configuration file.
    Validate {
        /// Path to the YAML configuration.
        config: PathBuf,
    },

    /// Resolve configuration and run the training driver.
    Train(TrainArgs),
}

/// Arguments of `sft-lab check`.
#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Directory containing session files [default: `data.data_dir`].
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Glob pattern for session files.
    #[arg(long, default_value = "*.jsonl")]
    pub pattern: String,

    /// Number of examples to preview.
    #[arg(long, default_value_t = 3)]
    pub num_examples: usize,

    /// Skip the tool-use preamble, even if configuration enables it.
    #[arg(long)]
    pub no_preamble: bool,

    /// Skip tool catalog injection, even if configuration enables it.
    #[arg(long)]
    pub no_catalog: bool,

    /// Print dataset statistics.
    #[arg(long)]
    pub stats: bool,

    /// Tool catalog location [default: `data.tool_catalog`].
    #[arg(long)]
    pub catalog: Option<PathBuf>,
}

/// Arguments of `sft-lab train`.
#[derive(Debug, Args)]
pub struct TrainArgs {
    /// YAML configuration layered over defaults, below `LLM_*` variables.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override `data.data_dir`.
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Override `training.output_dir`.
    #[arg(long)]
    pub output_dir: Option<String>,

    /// Run the loop without a model.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Per-file progress.
    Debug,
    /// Lifecycle events.
    Info,
    /// Skipped records and other warnings.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    /// Default `EnvFilter` directive for this level.
    #[must_use]
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warn => LevelFilter::WARN,
            Self::Error => LevelFilter::ERROR,
        }
    }
}

/// Run a parsed command line.
///
/// # Errors
///
/// Returns any structural error raised while loading data or configuration,
/// or while training.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Check(args) => check(&args, ConfigLoader::new()),
        Commands::Validate { config } => validate(config),
        Commands::Train(args) => train(args),
    }
}

fn check(args: &CheckArgs, loader: ConfigLoader) -> Result<()> {
    let config = loader.load()?;
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.data.data_dir));
    let catalog = args
        .catalog
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.data.tool_catalog));
    let options = check_options(args, &config);
    tracing::info!(
        "Loading data from {} (pattern={}, inject_preamble={}, inject_catalog={})",
        data_dir.display(),
        args.pattern,
        options.inject_preamble,
        options.inject_catalog
    );

    let examples = load_training_data(&data_dir, &[args.pattern.as_str()], options, &catalog)?;

    println!("{}", preview::render(&examples, args.num_examples));
    if args.stats {
        println!("{}", DatasetStats::from_examples(&examples));
    }
    Ok(())
}

/// Injection is on only when configuration enables it and no flag disables it.
fn check_options(args: &CheckArgs, config: &LabConfig) -> TransformOptions {
    TransformOptions {
        inject_preamble: !args.no_preamble && config.data.inject_tool_preamble,
        inject_catalog: !args.no_catalog && config.data.inject_tool_catalog,
    }
}

fn validate(path: PathBuf) -> Result<()> {
    let config = ConfigLoader::new().with_file(path).load()?;
    config.validate()?;
    println!("Configuration is valid");
    println!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

fn train(args: TrainArgs) -> Result<()> {
    let config = resolve_config(&args)?;

    if !args.dry_run {
        // Only the dry-run backend ships with this binary.
        let datasets = prepare_datasets(&config)?;
        return Err(LabError::Training(format!(
            "no model backend linked into this binary ({} train / {} eval examples ready); \
             rerun with --dry-run or drive Trainer::with_backend from a backend crate",
            datasets.train.len(),
            datasets.eval.len()
        )));
    }

    let mut trainer = Trainer::new(config)?;
    let summary = trainer.train()?;
    tracing::info!(
        "Finished {} steps over {} epochs ({} train / {} eval examples)",
        summary.steps,
        summary.epochs,
        summary.train_rows,
        summary.eval_rows
    );
    Ok(())
}

fn resolve_config(args: &TrainArgs) -> Result<LabConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_file(path);
    }
    if let Some(data_dir) = &args.data_dir {
        loader = loader.set_override("data.data_dir", data_dir.as_str());
    }
    if let Some(output_dir) = &args.output_dir {
        loader = loader.set_override("training.output_dir", output_dir.as_str());
    }
    loader.load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn check_args(data_dir: &Path) -> CheckArgs {
        CheckArgs {
            data_dir: Some(data_dir.to_path_buf()),
            pattern: "*.jsonl".into(),
            num_examples: 1,
            no_preamble: false,
            no_catalog: false,
            stats: true,
            catalog: None,
        }
    }

    fn session_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("a_session.jsonl"),
            r#"{"request": {"system": "s", "messages": [{"role": "user", "content": "hi"}]}, "response": {"content": "hello"}}"#,
        )
        .unwrap();
        dir
    }

    fn env_loader(vars: &[(&str, &str)]) -> ConfigLoader {
        ConfigLoader::new().with_env_source(vars.iter().copied())
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_check_defaults() {
        let cli = Cli::try_parse_from(["sft-lab", "check"]).unwrap();
        let Commands::Check(args) = cli.command else {
            panic!("expected check");
        };
        assert_eq!(args.data_dir, None);
        assert_eq!(args.catalog, None);
        assert_eq!(args.pattern, "*.jsonl");
        assert_eq!(args.num_examples, 3);
        assert!(!args.no_preamble);
        assert!(!args.no_catalog);
        assert!(!args.stats);
        assert_eq!(cli.log_level, LogLevel::Info);
    }

    #[test]
    fn test_check_flags() {
        let cli = Cli::try_parse_from([
            "sft-lab",
            "check",
            "--data-dir",
            "logs",
            "--pattern",
            "day*.jsonl",
            "--num-examples",
            "5",
            "--no-preamble",
            "--no-catalog",
            "--stats",
            "--log-level",
            "debug",
        ])
        .unwrap();
        let Commands::Check(args) = cli.command else {
            panic!("expected check");
        };
        assert_eq!(args.data_dir, Some(PathBuf::from("logs")));
        assert_eq!(args.pattern, "day*.jsonl");
        assert_eq!(args.num_examples, 5);
        assert!(args.no_preamble && args.no_catalog && args.stats);
        assert_eq!(cli.log_level.level_filter(), LevelFilter::DEBUG);
    }

    #[test]
    fn test_train_arguments() {
        let cli =
            Cli::try_parse_from(["sft-lab", "train", "-c", "run.yaml", "--dry-run"]).unwrap();
        let Commands::Train(args) = cli.command else {
            panic!("expected train");
        };
        assert_eq!(args.config, Some(PathBuf::from("run.yaml")));
        assert!(args.dry_run);
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        assert!(Cli::try_parse_from(["sft-lab", "--log-level", "loud", "check"]).is_err());
    }

    #[test]
    fn test_resolve_config_applies_overrides() {
        let args = TrainArgs {
            config: None,
            data_dir: Some("sessions".into()),
            output_dir: Some("runs/a".into()),
            dry_run: true,
        };
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.data.data_dir, "sessions");
        assert_eq!(config.training.output_dir, "runs/a");
    }

    #[test]
    fn test_check_flags_and_config_combine() {
        let dir = session_dir();
        let mut args = check_args(dir.path());

        let config = env_loader(&[]).load().unwrap();
        assert_eq!(check_options(&args, &config), TransformOptions::default());

        let config = env_loader(&[
            ("LLM_DATA__INJECT_TOOL_PREAMBLE", "false"),
            ("LLM_DATA__INJECT_TOOL_CATALOG", "true"),
        ])
        .load()
        .unwrap();
        args.no_catalog = true;
        let options = check_options(&args, &config);
        assert!(!options.inject_preamble);
        assert!(!options.inject_catalog);
    }

    #[test]
    fn test_check_skips_catalog_disabled_by_config() {
        let dir = session_dir();
        let mut args = check_args(dir.path());
        args.catalog = Some(PathBuf::from("/nonexistent.json"));

        let loader = env_loader(&[("LLM_DATA__INJECT_TOOL_CATALOG", "false")]);
        assert!(check(&args, loader).is_ok());
    }

    #[test]
    fn test_check_uses_configured_catalog_and_data_dir() {
        let dir = session_dir();
        let missing = dir.path().join("missing_catalog.json");
        let mut args = check_args(dir.path());
        args.data_dir = None;

        let data_dir = dir.path().to_string_lossy().into_owned();
        let catalog = missing.to_string_lossy().into_owned();
        let loader = env_loader(&[
            ("LLM_DATA__DATA_DIR", data_dir.as_str()),
            ("LLM_DATA__TOOL_CATALOG", catalog.as_str()),
        ]);
        assert!(matches!(
            check(&args, loader),
            Err(LabError::CatalogUnavailable { path, .. }) if path == missing
        ));
    }
}
