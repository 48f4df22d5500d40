//! VQA Mix - multiple-choice visual question answering toolkit.
//!
//! Utilities for building and scoring multiple-choice VQA datasets from
//! captioned images.
//!
//! # Overview
//!
//! A typical run:
//! 1. Load an annotation file (image paths plus captions) as a table
//! 2. Ask an LLM to write A-D questions per caption at chosen difficulty levels
//! 3. Answer the questions with a vision-language model (feature `vlm`)
//! 4. Score the answers and render accuracy and confusion-matrix charts
//!
//! Image augmentation helpers build perturbed copies of the image set.
//!
//! # Quick Start
//!
//! ```no_run
//! use vqa_mix::{
//!     config::Config,
//!     data::{load_annotations_as_table, table_to_records},
//!     llm::LlmClient,
//!     question::{Difficulty, QuestionSynthesizer},
//! };
//! use rand::SeedableRng;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load configuration
//!     let config = Config::load()?;
//!     config.validate()?;
//!
//!     // Load captions
//!     let mut table = load_annotations_as_table(Path::new("annotations.json"))?;
//!
//!     // Write one medium question per caption
//!     let synthesizer = QuestionSynthesizer::new(LlmClient::new(config.llm)?);
//!     let mut rng = rand::rngs::StdRng::seed_from_u64(42);
//!     synthesizer
//!         .synthesize_for_table(&mut table, "caption", &[Difficulty::Medium], &mut rng)
//!         .await?;
//!
//!     table_to_records(&table, Path::new("questions.json"))?;
//!     Ok(())
//! }
//! ```

pub mod augment;
pub mod config;
pub mod data;
pub mod error;
pub mod eval;
pub mod inference;
pub mod llm;
pub mod question;

pub use config::Config;
pub use data::{AnnotationRecord, AnnotationTable};
pub use error::{Result, VqaError};
pub use question::{Difficulty, Label, MultipleChoiceQuestion, QuestionSynthesizer};
