//! # sft-lab
//!
//! Turns logged request/response sessions into supervised fine-tuning
//! examples and drives `LoRA` runs over them.
//!
//! Each session line becomes one [`TrainingExample`]: the system prompt, any
//! tool definitions and the message history are flattened into a delimited
//! prompt, and the logged response (text or tool calls) becomes the target.
//! A fixed tool-use preamble and a tool catalog can be injected so the model
//! learns to call tools even from turns that carried none.
//!
//! ## Features
//!
//! - **Deterministic formatting** - identical records always produce identical examples
//! - **Fault-tolerant loading** - malformed lines are reported and skipped
//! - **Layered configuration** - defaults, YAML, `LLM_*` variables, overrides
//! - **Pluggable training** - the loop drives any [`trainer::TrainingBackend`]
//!
//! ## Quick Start
//!
//! ```bash
//! # Preview examples and statistics
//! sft-lab check --data-dir data --pattern '*session*.jsonl' --stats
//!
//! # Validate configuration
//! sft-lab validate config.yaml
//!
//! # Run the training loop without a model
//! sft-lab train --config config.yaml --dry-run
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod error;
pub mod inject;
pub mod preview;
pub mod session;
pub mod trainer;
pub mod transform;

pub use catalog::ToolCatalog;
pub use config::{ConfigLoader, LabConfig};
pub use corpus::{load_training_data, RecordOutcome, SessionCorpus};
pub use error::{LabError, Result};
pub use session::SessionTurn;
pub use trainer::Trainer;
pub use transform::{process_session_turn, TrainingExample, TransformOptions, TurnTransformer};
