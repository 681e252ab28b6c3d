//! Configuration parsing, layering and validation.
//!
//! Settings resolve once at startup, lowest to highest priority:
//!
//! 1. documented defaults
//! 2. an optional YAML file
//! 3. environment variables prefixed `LLM_`, with `__` between nested keys
//!    (`LLM_DATA__MAX_LENGTH=2048`, `LLM_DATA__TRAIN_FILES=a.jsonl,b.jsonl`)
//! 4. explicit overrides
//!
//! ```no_run
//! use sft_lab::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .set_override("data.data_dir", "sessions")
//!     .load()?;
//! # Ok::<(), sft_lab::LabError>(())
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LabError, Result};

/// Prefix shared by every configuration environment variable.
pub const ENV_PREFIX: &str = "LLM";

/// Delimiter between nested keys in environment variable names.
pub const ENV_NESTED_DELIMITER: &str = "__";

/// Train pattern used when `data.train_files` is empty.
pub const DEFAULT_TRAIN_PATTERN: &str = "*session*.jsonl";

/// Keys whose environment values are comma-separated lists.
const LIST_KEYS: [&str; 3] = ["data.train_files", "data.eval_files", "lora.target_modules"];

/// Complete configuration for a fine-tuning run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabConfig {
    /// Base model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Session data settings.
    #[serde(default)]
    pub data: DataConfig,

    /// `LoRA` adapter settings.
    #[serde(default)]
    pub lora: LoraSettings,

    /// Trainer hyperparameters.
    #[serde(default)]
    pub training: TrainingConfig,
}

/// Base model settings, handed to the external trainer untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// `HuggingFace` model ID or local path.
    #[serde(default = "default_base_model")]
    pub base_model: String,

    /// Weight dtype name understood by the trainer.
    #[serde(default = "default_torch_dtype")]
    pub torch_dtype: String,

    /// Device placement strategy.
    #[serde(default = "default_device_map")]
    pub device_map: String,
}

fn default_base_model() -> String {
    "meta-llama/Meta-Llama-3-8B-Instruct".into()
}
fn default_torch_dtype() -> String {
    "bfloat16".into()
}
fn default_device_map() -> String {
    "auto".into()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_model: default_base_model(),
            torch_dtype: default_torch_dtype(),
            device_map: default_device_map(),
        }
    }
}

/// Session data settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory holding the session files.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Glob patterns for training files, relative to `data_dir`.
    #[serde(default)]
    pub train_files: Vec<String>,

    /// Glob patterns for evaluation files. Empty means split from train.
    #[serde(default)]
    pub eval_files: Vec<String>,

    /// Maximum sequence length passed to the trainer.
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Prepend the tool-use preamble to system prompts.
    #[serde(default = "default_true")]
    pub inject_tool_preamble: bool,

    /// Attach the tool catalog to turns that carry no tools.
    #[serde(default = "default_true")]
    pub inject_tool_catalog: bool,

    /// Location of the tool catalog document.
    #[serde(default = "default_tool_catalog")]
    pub tool_catalog: String,
}

fn default_data_dir() -> String {
    "data".into()
}
fn default_max_length() -> usize {
    4096
}
fn default_true() -> bool {
    true
}
fn default_tool_catalog() -> String {
    crate::catalog::DEFAULT_CATALOG_PATH.into()
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            train_files: Vec::new(),
            eval_files: Vec::new(),
            max_length: default_max_length(),
            inject_tool_preamble: true,
            inject_tool_catalog: true,
            tool_catalog: default_tool_catalog(),
        }
    }
}

impl DataConfig {
    /// Training patterns, falling back to [`DEFAULT_TRAIN_PATTERN`].
    #[must_use]
    pub fn train_patterns(&self) -> Vec<String> {
        if self.train_files.is_empty() {
            vec![DEFAULT_TRAIN_PATTERN.to_string()]
        } else {
            self.train_files.clone()
        }
    }
}

/// LoRA-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraSettings {
    /// Rank of low-rank decomposition.
    #[serde(default = "default_lora_r")]
    pub r: usize,

    /// Scaling factor.
    #[serde(default = "default_lora_alpha")]
    pub lora_alpha: usize,

    /// Dropout probability.
    #[serde(default = "default_lora_dropout")]
    pub lora_dropout: f64,

    /// Target modules for `LoRA`.
    #[serde(default = "default_target_modules")]
    pub target_modules: Vec<String>,
}

fn default_lora_r() -> usize {
    16
}
fn default_lora_alpha() -> usize {
    32
}
fn default_lora_dropout() -> f64 {
    0.05
}
fn default_target_modules() -> Vec<String> {
    vec![
        "q_proj".into(),
        "k_proj".into(),
        "v_proj".into(),
        "o_proj".into(),
        "gate_proj".into(),
        "up_proj".into(),
        "down_proj".into(),
    ]
}

impl Default for LoraSettings {
    fn default() -> Self {
        Self {
            r: default_lora_r(),
            lora_alpha: default_lora_alpha(),
            lora_dropout: default_lora_dropout(),
            target_modules: default_target_modules(),
        }
    }
}

/// Training hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Output directory for checkpoints and the final adapter.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Number of training epochs.
    #[serde(default = "default_epochs")]
    pub num_train_epochs: usize,

    /// Training batch size per device.
    #[serde(default = "default_batch_size")]
    pub per_device_train_batch_size: usize,

    /// Evaluation batch size per device.
    #[serde(default = "default_batch_size")]
    pub per_device_eval_batch_size: usize,

    /// Gradient accumulation steps.
    #[serde(default = "default_grad_accum")]
    pub gradient_accumulation_steps: usize,

    /// Learning rate.
    #[serde(default = "default_lr")]
    pub learning_rate: f64,

    /// Train in bfloat16.
    #[serde(default = "default_true")]
    pub bf16: bool,

    /// Log every N steps.
    #[serde(default = "default_log_steps")]
    pub logging_steps: usize,

    /// When to run evaluation.
    #[serde(default)]
    pub evaluation_strategy: EvaluationStrategy,

    /// Evaluate every N steps.
    #[serde(default = "default_eval_steps")]
    pub eval_steps: usize,

    /// Save checkpoint every N steps.
    #[serde(default = "default_save_steps")]
    pub save_steps: usize,

    /// Learning rate scheduler.
    #[serde(default)]
    pub lr_scheduler_type: LrScheduler,

    /// Warmup ratio.
    #[serde(default = "default_warmup")]
    pub warmup_ratio: f64,

    /// Reporting integration name.
    #[serde(default = "default_report_to")]
    pub report_to: String,
}

fn default_output_dir() -> String {
    "out/lora-ckpt".into()
}
fn default_epochs() -> usize {
    2
}
fn default_batch_size() -> usize {
    2
}
fn default_grad_accum() -> usize {
    8
}
fn default_lr() -> f64 {
    2e-4
}
fn default_log_steps() -> usize {
    20
}
fn default_eval_steps() -> usize {
    200
}
fn default_save_steps() -> usize {
    200
}
fn default_warmup() -> f64 {
    0.05
}
fn default_report_to() -> String {
    "none".into()
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            num_train_epochs: default_epochs(),
            per_device_train_batch_size: default_batch_size(),
            per_device_eval_batch_size: default_batch_size(),
            gradient_accumulation_steps: default_grad_accum(),
            learning_rate: default_lr(),
            bf16: true,
            logging_steps: default_log_steps(),
            evaluation_strategy: EvaluationStrategy::Steps,
            eval_steps: default_eval_steps(),
            save_steps: default_save_steps(),
            lr_scheduler_type: LrScheduler::Cosine,
            warmup_ratio: default_warmup(),
            report_to: default_report_to(),
        }
    }
}

/// When the trainer evaluates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStrategy {
    /// Never evaluate.
    No,
    /// Every `eval_steps` optimizer steps.
    #[default]
    Steps,
    /// At the end of each epoch.
    Epoch,
}

/// Learning rate scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LrScheduler {
    /// Cosine annealing.
    #[default]
    Cosine,
    /// Linear decay.
    Linear,
    /// Constant learning rate.
    Constant,
}

impl LabConfig {
    /// Resolve configuration from defaults and the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment value cannot be deserialized.
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from a YAML file, defaults filling the gaps.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.model.base_model.is_empty() {
            return Err(LabError::Config("model.base_model is required".into()));
        }

        if self.data.data_dir.is_empty() {
            return Err(LabError::Config("data.data_dir is required".into()));
        }

        if self.data.max_length == 0 {
            return Err(LabError::Config("data.max_length must be > 0".into()));
        }

        if self.lora.r == 0 {
            return Err(LabError::Config("lora.r must be > 0".into()));
        }

        if self.training.per_device_train_batch_size == 0
            || self.training.per_device_eval_batch_size == 0
        {
            return Err(LabError::Config("batch sizes must be > 0".into()));
        }

        if self.training.gradient_accumulation_steps == 0 {
            return Err(LabError::Config(
                "training.gradient_accumulation_steps must be > 0".into(),
            ));
        }

        if self.training.logging_steps == 0 || self.training.save_steps == 0 {
            return Err(LabError::Config(
                "training.logging_steps and training.save_steps must be > 0".into(),
            ));
        }

        if matches!(self.training.evaluation_strategy, EvaluationStrategy::Steps)
            && self.training.eval_steps == 0
        {
            return Err(LabError::Config(
                "training.eval_steps must be > 0 when evaluating by steps".into(),
            ));
        }

        Ok(())
    }
}

/// Layered configuration resolution built on the `config` crate.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env: Option<config::Map<String, String>>,
    overrides: Vec<(String, config::Value)>,
}

impl ConfigLoader {
    /// Loader with defaults and the process environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer a YAML file above the defaults.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Read environment variables from `vars` instead of the process.
    #[must_use]
    pub fn with_env_source<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Force `key` (dotted path, e.g. `data.data_dir`) to `value`.
    #[must_use]
    pub fn set_override(mut self, key: &str, value: impl Into<config::Value>) -> Self {
        self.overrides.push((key.to_string(), value.into()));
        self
    }

    /// Merge every layer into a [`LabConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unparseable, or a value
    /// has the wrong type for its key.
    pub fn load(self) -> Result<LabConfig> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&LabConfig::default())?);

        if let Some(path) = &self.file {
            if !path.exists() {
                return Err(LabError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(
                config::File::from(path.as_path()).format(config::FileFormat::Yaml),
            );
        }

        let mut environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator(ENV_NESTED_DELIMITER)
            .list_separator(",")
            .try_parsing(true);
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }
        builder = builder.add_source(environment.source(self.env));

        for (key, value) in self.overrides {
            builder = builder.set_override(key, value)?;
        }

        let config: LabConfig = builder.build()?.try_deserialize()?;
        tracing::debug!(
            "Resolved configuration: data_dir={}, base_model={}",
            config.data.data_dir,
            config.model.base_model
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env() -> ConfigLoader {
        ConfigLoader::new().with_env_source(Vec::<(String, String)>::new())
    }

    #[test]
    fn test_lora_defaults() {
        let lora = LoraSettings::default();
        assert_eq!(lora.r, 16);
        assert_eq!(lora.lora_alpha, 32);
        assert!((lora.lora_dropout - 0.05).abs() < f64::EPSILON);
        assert!(lora.target_modules.contains(&"q_proj".to_string()));
        assert_eq!(lora.target_modules.len(), 7);
    }

    #[test]
    fn test_training_defaults() {
        let training = TrainingConfig::default();
        assert_eq!(training.num_train_epochs, 2);
        assert!((training.learning_rate - 2e-4).abs() < f64::EPSILON);
        assert!(training.bf16);
        assert_eq!(training.lr_scheduler_type, LrScheduler::Cosine);
        assert_eq!(training.evaluation_strategy, EvaluationStrategy::Steps);
        assert_eq!(training.output_dir, "out/lora-ckpt");
    }

    #[test]
    fn test_data_defaults() {
        let data = DataConfig::default();
        assert_eq!(data.data_dir, "data");
        assert_eq!(data.max_length, 4096);
        assert!(data.inject_tool_preamble);
        assert!(data.inject_tool_catalog);
        assert!(data.train_files.is_empty());
        assert!(data.eval_files.is_empty());
    }

    #[test]
    fn test_model_defaults() {
        let model = ModelConfig::default();
        assert!(model.base_model.to_lowercase().contains("llama"));
        assert_eq!(model.torch_dtype, "bfloat16");
        assert_eq!(model.device_map, "auto");
    }

    #[test]
    fn test_train_patterns_fall_back_to_session_glob() {
        let mut data = DataConfig::default();
        assert_eq!(data.train_patterns(), vec!["*session*.jsonl".to_string()]);

        data.train_files = vec!["a.jsonl".into(), "b/*.jsonl".into()];
        assert_eq!(data.train_patterns(), vec!["a.jsonl", "b/*.jsonl"]);
    }

    #[test]
    fn test_loader_without_sources_yields_defaults() {
        let config = no_env().load().unwrap();
        assert_eq!(config, LabConfig::default());
    }

    #[test]
    fn test_loader_reads_nested_environment() {
        let config = ConfigLoader::new()
            .with_env_source([
                ("LLM_DATA__DATA_DIR", "sessions"),
                ("LLM_DATA__MAX_LENGTH", "2048"),
                ("LLM_DATA__INJECT_TOOL_CATALOG", "false"),
                ("LLM_DATA__TRAIN_FILES", "a.jsonl,b.jsonl"),
                ("LLM_LORA__R", "8"),
                ("LLM_TRAINING__LR_SCHEDULER_TYPE", "linear"),
            ])
            .load()
            .unwrap();

        assert_eq!(config.data.data_dir, "sessions");
        assert_eq!(config.data.max_length, 2048);
        assert!(!config.data.inject_tool_catalog);
        assert!(config.data.inject_tool_preamble);
        assert_eq!(config.data.train_files, vec!["a.jsonl", "b.jsonl"]);
        assert_eq!(config.lora.r, 8);
        assert_eq!(config.training.lr_scheduler_type, LrScheduler::Linear);
    }

    #[test]
    fn test_loader_ignores_other_prefixes() {
        let config = ConfigLoader::new()
            .with_env_source([("OTHER_DATA__DATA_DIR", "elsewhere")])
            .load()
            .unwrap();
        assert_eq!(config.data.data_dir, "data");
    }

    #[test]
    fn test_override_beats_environment() {
        let config = ConfigLoader::new()
            .with_env_source([("LLM_DATA__DATA_DIR", "from-env")])
            .set_override("data.data_dir", "from-override")
            .load()
            .unwrap();
        assert_eq!(config.data.data_dir, "from-override");
    }

    #[test]
    fn test_environment_beats_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lab.yaml");
        std::fs::write(&path, "data:\n  data_dir: from-file\n  max_length: 1024\n").unwrap();

        let config = ConfigLoader::new()
            .with_file(&path)
            .with_env_source([("LLM_DATA__DATA_DIR", "from-env")])
            .load()
            .unwrap();

        assert_eq!(config.data.data_dir, "from-env");
        assert_eq!(config.data.max_length, 1024);
        assert_eq!(config.lora, LoraSettings::default());
    }

    #[test]
    fn test_loader_missing_file() {
        let result = no_env().with_file("/nonexistent/lab.yaml").load();
        assert!(matches!(result, Err(LabError::Config(_))));
    }

    #[test]
    fn test_loader_rejects_wrong_type() {
        let result = ConfigLoader::new()
            .with_env_source([("LLM_DATA__MAX_LENGTH", "lots")])
            .load();
        assert!(matches!(result, Err(LabError::ConfigSource(_))));
    }

    #[test]
    fn test_yaml_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = LabConfig::default();
        config.data.train_files = vec!["train_*.jsonl".into()];
        config.training.evaluation_strategy = EvaluationStrategy::Epoch;
        config.to_file(&path).unwrap();

        let restored = LabConfig::from_file(&path).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: LabConfig = serde_yaml::from_str("lora:\n  r: 4\n").unwrap();
        assert_eq!(config.lora.r, 4);
        assert_eq!(config.lora.lora_alpha, 32);
        assert_eq!(config.data, DataConfig::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = LabConfig::default();
        assert!(config.validate().is_ok());

        config.model.base_model = String::new();
        assert!(config.validate().is_err());

        let mut config = LabConfig::default();
        config.lora.r = 0;
        assert!(config.validate().is_err());

        let mut config = LabConfig::default();
        config.training.per_device_train_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = LabConfig::default();
        config.training.eval_steps = 0;
        assert!(config.validate().is_err());
        config.training.evaluation_strategy = EvaluationStrategy::No;
        assert!(config.validate().is_ok());
    }
}
