//! End-to-end validation of the training driver.
//!
//! Resolves configuration from a YAML file and injected environment, builds
//! datasets from session files and runs the loop with the dry-run backend:
//! 1. Configuration layers resolve in order
//! 2. Train/eval datasets are assembled from the session files
//! 3. Checkpoints land in `checkpoint-<step>` directories
//! 4. The resolved configuration is saved next to the final model

use std::fs;
use std::path::Path;

use sft_lab::config::EvaluationStrategy;
use sft_lab::trainer::{prepare_datasets, CONFIG_FILE_NAME};
use sft_lab::{ConfigLoader, LabConfig, LabError, Trainer};
use tempfile::TempDir;

/// Number of session turns written for each run.
const SAMPLE_COUNT: usize = 20;

/// Create a session file whose turns alternate between text and tool calls.
fn create_session_file(path: &Path, num_turns: usize) {
    let mut content = String::new();
    for i in 0..num_turns {
        let response = if i % 2 == 0 {
            format!(r#""Answer number {i}.""#)
        } else {
            format!(
                r#"[{{"type":"tool_use","id":"call_{i}","name":"web_search","input":{{"query":"topic {i}"}}}}]"#
            )
        };
        content.push_str(&format!(
            r#"{{"request":{{"system":"You are helpful.","tools":null,"messages":[{{"role":"user","content":"Question {i}"}}]}},"response":{{"content":{response}}}}}"#
        ));
        content.push('\n');
    }
    fs::write(path, content).expect("Failed to write session file");
}

/// Create a minimal YAML config pointing at `data_dir` and `output_dir`.
fn create_config(data_dir: &Path, output_dir: &Path) -> String {
    format!(
        r#"
model:
  base_model: "test-model"

data:
  data_dir: "{}"
  inject_tool_catalog: false
  max_length: 512

lora:
  r: 8
  lora_alpha: 16

training:
  output_dir: "{}"
  num_train_epochs: 1
  per_device_train_batch_size: 2
  gradient_accumulation_steps: 1
  logging_steps: 5
  eval_steps: 3
  save_steps: 4
"#,
        data_dir.display(),
        output_dir.display()
    )
}

struct Workspace {
    _temp_dir: TempDir,
    config_path: std::path::PathBuf,
    output_dir: std::path::PathBuf,
}

fn workspace() -> Workspace {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let data_dir = temp_dir.path().join("data");
    let output_dir = temp_dir.path().join("out");
    fs::create_dir(&data_dir).unwrap();
    create_session_file(&data_dir.join("2024-05-01_session.jsonl"), SAMPLE_COUNT);

    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, create_config(&data_dir, &output_dir)).unwrap();

    Workspace {
        _temp_dir: temp_dir,
        config_path,
        output_dir,
    }
}

fn load(ws: &Workspace) -> LabConfig {
    ConfigLoader::new()
        .with_file(&ws.config_path)
        .with_env_source(Vec::<(String, String)>::new())
        .load()
        .unwrap()
}

#[test]
fn config_file_layers_over_defaults() {
    let ws = workspace();
    let config = load(&ws);

    assert_eq!(config.model.base_model, "test-model");
    assert_eq!(config.lora.r, 8);
    assert_eq!(config.data.max_length, 512);
    // untouched keys keep their defaults
    assert_eq!(config.lora.target_modules.len(), 7);
    assert_eq!(config.training.evaluation_strategy, EvaluationStrategy::Steps);
}

#[test]
fn environment_overrides_file() {
    let ws = workspace();
    let config = ConfigLoader::new()
        .with_file(&ws.config_path)
        .with_env_source([
            ("LLM_LORA__R", "4"),
            ("LLM_TRAINING__EVALUATION_STRATEGY", "epoch"),
        ])
        .load()
        .unwrap();

    assert_eq!(config.lora.r, 4);
    assert_eq!(config.training.evaluation_strategy, EvaluationStrategy::Epoch);
    assert_eq!(config.model.base_model, "test-model");
}

#[test]
fn datasets_split_from_session_files() {
    let ws = workspace();
    let datasets = prepare_datasets(&load(&ws)).unwrap();

    assert_eq!(datasets.train.len(), 18);
    assert_eq!(datasets.eval.len(), 2);
    assert!(datasets.train[1].output.contains("web_search"));
    assert!(datasets.train[0].input.contains("<|user|>\nQuestion 0\n<|end|>"));
}

#[test]
fn dry_run_writes_checkpoints_and_config() {
    let ws = workspace();
    let config = load(&ws);

    let mut trainer = Trainer::new(config.clone()).unwrap();
    let summary = trainer.train().unwrap();

    // 18 rows / batch of 2 = 9 steps
    assert_eq!(summary.steps, 9);
    assert_eq!(summary.eval_rows, 2);
    assert!(summary.last_eval_loss.is_some());
    assert!(ws.output_dir.join("checkpoint-4").is_dir());
    assert!(ws.output_dir.join("checkpoint-8").is_dir());
    assert!(!ws.output_dir.join("checkpoint-9").exists());

    let saved = LabConfig::from_file(ws.output_dir.join(CONFIG_FILE_NAME)).unwrap();
    assert_eq!(saved, config);
}

#[test]
fn invalid_config_is_rejected_before_training() {
    let ws = workspace();
    let result = ConfigLoader::new()
        .with_file(&ws.config_path)
        .with_env_source([("LLM_TRAINING__SAVE_STEPS", "0")])
        .load()
        .and_then(Trainer::new);

    assert!(matches!(result, Err(LabError::Config(_))));
}

#[test]
fn missing_config_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let result = ConfigLoader::new()
        .with_file(temp_dir.path().join("absent.yaml"))
        .load();
    assert!(matches!(result, Err(LabError::Config(_))));
}
