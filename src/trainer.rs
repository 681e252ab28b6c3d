//! Dataset assembly and the training loop.
//!
//! Model execution lives behind [`TrainingBackend`]; this module decides what
//! is trained on, in which order, and when to log, evaluate and save.

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use crate::config::{EvaluationStrategy, LabConfig};
use crate::corpus::{discover_corpus_files, SessionCorpus};
use crate::error::{LabError, Result};
use crate::transform::{TrainingExample, TransformOptions, TurnTransformer};

/// File the resolved configuration is written to inside `output_dir`.
pub const CONFIG_FILE_NAME: &str = "sft_lab_config.yaml";

/// Share of examples kept for training when no eval files are configured.
const TRAIN_SPLIT_NUMERATOR: usize = 9;
const TRAIN_SPLIT_DENOMINATOR: usize = 10;

/// One row handed to the trainer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRow {
    /// Prompt text.
    pub input: String,
    /// Target completion.
    pub output: String,
}

impl From<TrainingExample> for DatasetRow {
    fn from(example: TrainingExample) -> Self {
        Self {
            input: example.input,
            output: example.output,
        }
    }
}

/// Train and eval rows for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedDatasets {
    /// Training rows.
    pub train: Vec<DatasetRow>,
    /// Evaluation rows.
    pub eval: Vec<DatasetRow>,
}

/// Build train and eval datasets from the configured session files.
///
/// Without `eval_files`, the first 90% of train examples (rounded down) are
/// kept for training and the rest become the eval set.
///
/// # Errors
///
/// Returns an error if the data directory, a pattern or the tool catalog
/// cannot be resolved, or a session file cannot be read.
pub fn prepare_datasets(config: &LabConfig) -> Result<PreparedDatasets> {
    let data = &config.data;
    let data_dir = Path::new(&data.data_dir);

    let train_files = discover_corpus_files(data_dir, &data.train_patterns())?;
    let eval_files = if data.eval_files.is_empty() {
        None
    } else {
        Some(discover_corpus_files(data_dir, &data.eval_files)?)
    };

    let options = TransformOptions {
        inject_preamble: data.inject_tool_preamble,
        inject_catalog: data.inject_tool_catalog,
    };
    let transformer = TurnTransformer::from_options(options, &data.tool_catalog)?;

    let mut train: Vec<DatasetRow> = SessionCorpus::new(train_files, transformer.clone())
        .load()?
        .into_iter()
        .map(DatasetRow::from)
        .collect();

    let eval = match eval_files {
        Some(files) => SessionCorpus::new(files, transformer)
            .load()?
            .into_iter()
            .map(DatasetRow::from)
            .collect(),
        None => {
            let split_idx = train.len() * TRAIN_SPLIT_NUMERATOR / TRAIN_SPLIT_DENOMINATOR;
            train.split_off(split_idx)
        }
    };

    tracing::info!(
        "Datasets prepared: train_examples={}, eval_examples={}",
        train.len(),
        eval.len()
    );
    Ok(PreparedDatasets { train, eval })
}

/// The external trainer, seen through the operations the loop needs.
pub trait TrainingBackend {
    /// Load the model and attach adapters before the first step.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be set up.
    fn prepare(&mut self, config: &LabConfig, datasets: &PreparedDatasets) -> Result<()>;

    /// Run forward and backward passes over one micro-batch, returning its loss.
    ///
    /// # Errors
    ///
    /// Returns an error if the step fails.
    fn train_step(&mut self, batch: &[DatasetRow]) -> Result<f64>;

    /// Apply accumulated gradients.
    ///
    /// # Errors
    ///
    /// Returns an error if the optimizer step fails.
    fn optimizer_step(&mut self) -> Result<()>;

    /// Compute the loss over one eval batch without updating weights.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails.
    fn evaluate(&mut self, batch: &[DatasetRow]) -> Result<f64>;

    /// Persist adapter weights and tokenizer files into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    fn save(&mut self, dir: &Path) -> Result<()>;
}

/// Backend that runs the loop without a model.
///
/// Reports zero loss and records what it was asked to do.
#[derive(Debug, Default)]
pub struct DryRunBackend {
    /// Micro-batches seen.
    pub micro_batches: usize,
    /// Optimizer steps applied.
    pub optimizer_steps: usize,
    /// Eval batches seen.
    pub eval_batches: usize,
    /// Directories saved to, in order.
    pub saved: Vec<PathBuf>,
}

impl TrainingBackend for DryRunBackend {
    fn prepare(&mut self, config: &LabConfig, datasets: &PreparedDatasets) -> Result<()> {
        tracing::info!(
            "Dry run: skipping model load for {} ({} train rows, {} eval rows)",
            config.model.base_model,
            datasets.train.len(),
            datasets.eval.len()
        );
        Ok(())
    }

    fn train_step(&mut self, _batch: &[DatasetRow]) -> Result<f64> {
        self.micro_batches += 1;
        Ok(0.0)
    }

    fn optimizer_step(&mut self) -> Result<()> {
        self.optimizer_steps += 1;
        Ok(())
    }

    fn evaluate(&mut self, _batch: &[DatasetRow]) -> Result<f64> {
        self.eval_batches += 1;
        Ok(0.0)
    }

    fn save(&mut self, dir: &Path) -> Result<()> {
        self.saved.push(dir.to_path_buf());
        Ok(())
    }
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    /// Optimizer steps taken.
    pub steps: usize,
    /// Epochs completed.
    pub epochs: usize,
    /// Rows trained on per epoch.
    pub train_rows: usize,
    /// Rows evaluated on.
    pub eval_rows: usize,
    /// Loss of the last evaluation, if any ran.
    pub last_eval_loss: Option<f64>,
}

/// Training orchestrator.
pub struct Trainer<B: TrainingBackend = DryRunBackend> {
    /// Configuration
    config: LabConfig,
    /// Model backend
    backend: B,
    /// Optimizer steps taken
    step: usize,
    /// Current epoch
    epoch: usize,
}

impl Trainer<DryRunBackend> {
    /// Create a trainer that runs without a model.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: LabConfig) -> Result<Self> {
        Self::with_backend(config, DryRunBackend::default())
    }
}

impl<B: TrainingBackend> Trainer<B> {
    /// Create a trainer over `backend`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_backend(config: LabConfig, backend: B) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            backend,
            step: 0,
            epoch: 0,
        })
    }

    /// The backend, for inspection after a run.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Optimizer steps taken so far.
    #[must_use]
    pub fn step(&self) -> usize {
        self.step
    }

    /// Zero-based epoch the loop is in, or finished last.
    #[must_use]
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Load the configured datasets and train on them.
    ///
    /// # Errors
    ///
    /// Returns an error if the datasets cannot be prepared or training fails.
    pub fn train(&mut self) -> Result<TrainingSummary> {
        let config = &self.config;
        tracing::info!(
            "Starting training with config: base_model={}, output_dir={}, lora_r={}, lora_alpha={}, learning_rate={}, batch_size={}, epochs={}, bf16={}",
            config.model.base_model,
            config.training.output_dir,
            config.lora.r,
            config.lora.lora_alpha,
            config.training.learning_rate,
            config.training.per_device_train_batch_size,
            config.training.num_train_epochs,
            config.training.bf16
        );
        tracing::info!(
            "Loading and preparing datasets from data_dir={}",
            config.data.data_dir
        );

        let datasets = prepare_datasets(&self.config)?;
        self.train_on(&datasets)
    }

    /// Train on already-prepared datasets.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or a checkpoint cannot be written.
    pub fn train_on(&mut self, datasets: &PreparedDatasets) -> Result<TrainingSummary> {
        let training = self.config.training.clone();
        let output_dir = PathBuf::from(&training.output_dir);
        std::fs::create_dir_all(&output_dir)?;

        self.backend.prepare(&self.config, datasets)?;

        let micro_batches_per_epoch = datasets
            .train
            .len()
            .div_ceil(training.per_device_train_batch_size);
        let steps_per_epoch = micro_batches_per_epoch.div_ceil(training.gradient_accumulation_steps);
        let total_steps = steps_per_epoch * training.num_train_epochs;

        tracing::info!(
            "Beginning training loop for {} epochs ({} steps, max_length={}, gradient_accumulation_steps={})",
            training.num_train_epochs,
            total_steps,
            self.config.data.max_length,
            training.gradient_accumulation_steps
        );

        let pb = ProgressBar::new(total_steps as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )?
                .progress_chars("#>-"),
        );

        let mut last_eval_loss = None;
        let mut window_loss = 0.0;
        let mut window_batches = 0usize;
        let mut epochs_done = 0;

        for epoch in 0..training.num_train_epochs {
            self.epoch = epoch;
            tracing::info!("Starting epoch {}/{}", epoch + 1, training.num_train_epochs);

            let mut pending = 0usize;
            let mut batches = datasets
                .train
                .chunks(training.per_device_train_batch_size)
                .peekable();

            while let Some(batch) = batches.next() {
                window_loss += self.backend.train_step(batch)?;
                window_batches += 1;
                pending += 1;

                if pending < training.gradient_accumulation_steps && batches.peek().is_some() {
                    continue;
                }

                self.backend.optimizer_step()?;
                pending = 0;
                self.step += 1;
                pb.inc(1);

                if self.step % training.logging_steps == 0 {
                    #[allow(clippy::cast_precision_loss)]
                    let loss = window_loss / window_batches as f64;
                    pb.println(format!("step {}: loss={loss:.4}", self.step));
                    tracing::info!("step={} epoch={} loss={:.4}", self.step, epoch + 1, loss);
                    window_loss = 0.0;
                    window_batches = 0;
                }

                if training.evaluation_strategy == EvaluationStrategy::Steps
                    && self.step % training.eval_steps == 0
                {
                    last_eval_loss = self.evaluate(&datasets.eval)?.or(last_eval_loss);
                }

                if self.step % training.save_steps == 0 {
                    self.save_checkpoint(&output_dir)?;
                }
            }

            if training.evaluation_strategy == EvaluationStrategy::Epoch {
                last_eval_loss = self.evaluate(&datasets.eval)?.or(last_eval_loss);
            }
            epochs_done = epoch + 1;
        }

        pb.finish_with_message("Training complete");

        tracing::info!(
            "Training complete, saving model to output_dir={}",
            output_dir.display()
        );
        self.backend.save(&output_dir)?;
        self.config.to_file(output_dir.join(CONFIG_FILE_NAME))?;
        tracing::info!("Model and configuration saved successfully");

        Ok(TrainingSummary {
            steps: self.step,
            epochs: epochs_done,
            train_rows: datasets.train.len(),
            eval_rows: datasets.eval.len(),
            last_eval_loss,
        })
    }

    /// Mean eval loss over `rows`, or `None` when there is nothing to evaluate.
    fn evaluate(&mut self, rows: &[DatasetRow]) -> Result<Option<f64>> {
        if rows.is_empty() {
            return Ok(None);
        }

        let mut total = 0.0;
        let mut batches = 0usize;
        for batch in rows.chunks(self.config.training.per_device_eval_batch_size) {
            total += self.backend.evaluate(batch)?;
            batches += 1;
        }

        #[allow(clippy::cast_precision_loss)]
        let loss = total / batches as f64;
        tracing::info!("step={} eval_loss={:.4}", self.step, loss);
        Ok(Some(loss))
    }

    /// Save a checkpoint.
    fn save_checkpoint(&mut self, output_dir: &Path) -> Result<()> {
        let checkpoint_dir = output_dir.join(format!("checkpoint-{}", self.step));
        std::fs::create_dir_all(&checkpoint_dir).map_err(|e| {
            LabError::Checkpoint(format!("cannot create {}: {e}", checkpoint_dir.display()))
        })?;

        self.backend.save(&checkpoint_dir)?;

        tracing::info!("Saved checkpoint to: {}", checkpoint_dir.display());
        Ok(())
    }
}
