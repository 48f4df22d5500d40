//! Multiple-choice answering with a vision-language model.
//!
//! The pipeline is written against two traits mirroring the usual
//! processor/model split of pretrained VLMs:
//!
//! - [`Processor`] owns the chat template, turns an image and prompt into
//!   model inputs and decodes generated tokens back to text.
//! - [`VisionLanguageModel`] runs autoregressive generation.
//!
//! With the `vlm` feature enabled, [`load_model`] provides a candle-backed
//! PaliGemma implementation of both.

#[cfg(feature = "vlm")]
mod paligemma;

#[cfg(feature = "vlm")]
pub use paligemma::{PaliGemmaInputs, PaliGemmaModel, PaliGemmaProcessor, load_model};

use crate::error::{Result, VqaError};
use crate::llm::Prompts;
use image::RgbImage;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// One piece of a chat turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// Placeholder for the image passed alongside the prompt.
    Image,
}

/// A user turn of a single-turn conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub content: Vec<ContentPart>,
}

impl ChatTurn {
    pub fn user(content: Vec<ContentPart>) -> Self {
        Self { content }
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(t) => Some(t.as_str()),
                ContentPart::Image => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_image(&self) -> bool {
        self.content.iter().any(|p| matches!(p, ContentPart::Image))
    }
}

/// Preprocessing and decoding side of a pretrained model.
pub trait Processor {
    /// Model-ready inputs for one (image, prompt) pair.
    type Inputs;

    /// Render a conversation into a prompt ending with the generation cue.
    fn apply_chat_template(&self, conversation: &[ChatTurn]) -> String;

    /// Text separating the echoed prompt from the model's response in the
    /// decoded output.
    fn response_marker(&self) -> &str;

    fn prepare(&self, image: &RgbImage, prompt: &str) -> Result<Self::Inputs>;

    /// Decode a full output sequence, skipping special tokens.
    fn decode(&self, tokens: &[u32]) -> Result<String>;
}

/// Generation side of a pretrained model.
pub trait VisionLanguageModel<I> {
    /// Returns the prompt tokens followed by the generated tokens.
    fn generate(&mut self, inputs: &I, max_new_tokens: usize) -> Result<Vec<u32>>;
}

/// Compute device selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec {
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl DeviceSpec {
    pub fn is_accelerator(&self) -> bool {
        !matches!(self, DeviceSpec::Cpu)
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Cpu => write!(f, "cpu"),
            DeviceSpec::Cuda(i) => write!(f, "cuda:{}", i),
            DeviceSpec::Metal(i) => write!(f, "metal:{}", i),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = VqaError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        let (kind, ordinal) = match s.split_once(':') {
            Some((kind, ordinal)) => {
                let ordinal = ordinal.parse::<usize>().map_err(|_| {
                    VqaError::ModelLoad(format!("invalid device ordinal in '{}'", s))
                })?;
                (kind, ordinal)
            }
            None => (s.as_str(), 0),
        };

        match kind {
            "cpu" if ordinal == 0 => Ok(DeviceSpec::Cpu),
            "cuda" | "gpu" => Ok(DeviceSpec::Cuda(ordinal)),
            "metal" | "mps" => Ok(DeviceSpec::Metal(ordinal)),
            _ => Err(VqaError::ModelLoad(format!(
                "unsupported device '{}' (expected cpu, cuda[:N] or metal[:N])",
                s
            ))),
        }
    }
}

/// Per-call generation settings.
#[derive(Debug, Clone)]
pub struct InferenceOptions {
    pub max_new_tokens: usize,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: 150,
        }
    }
}

/// Build the single-turn conversation asking for a one-letter answer.
pub fn multiple_choice_conversation(question: &str) -> Vec<ChatTurn> {
    vec![ChatTurn::user(vec![
        ContentPart::Text(format!(
            "{}\n{}",
            question,
            Prompts::single_letter_instruction()
        )),
        ContentPart::Image,
    ])]
}

/// Text between the first response marker and the next one (or the end),
/// trimmed.
pub fn extract_answer(decoded: &str, marker: &str) -> Result<String> {
    match decoded.split(marker).nth(1) {
        Some(answer) => Ok(answer.trim().to_string()),
        None => Err(VqaError::Inference(format!(
            "response marker '{}' not found in model output: {:?}",
            marker,
            truncate(decoded, 120)
        ))),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    let mut out: String = s.chars().take(max_chars).collect();
    if s.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

/// Load an image as 8-bit RGB.
pub fn load_rgb_image(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).map_err(|e| VqaError::image(path, e))?;
    Ok(image.to_rgb8())
}

/// Ask the model one multiple-choice question about one image.
pub fn answer_multiple_choice<P, M>(
    processor: &P,
    model: &mut M,
    image_path: &Path,
    question: &str,
    options: &InferenceOptions,
) -> Result<String>
where
    P: Processor,
    M: VisionLanguageModel<P::Inputs>,
{
    let image = load_rgb_image(image_path)?;

    let conversation = multiple_choice_conversation(question);
    let prompt = processor.apply_chat_template(&conversation);
    log::debug!("Prompt for {}: {:?}", image_path.display(), prompt);

    let inputs = processor.prepare(&image, &prompt)?;
    let output = model.generate(&inputs, options.max_new_tokens)?;
    let decoded = processor.decode(&output)?;

    extract_answer(&decoded, processor.response_marker())
}

/// Answer `questions[i]` about `images[i]` for every `i`, in order.
pub fn batch_answer<P, M>(
    processor: &P,
    model: &mut M,
    images: &[PathBuf],
    questions: &[String],
    options: &InferenceOptions,
) -> Result<Vec<String>>
where
    P: Processor,
    M: VisionLanguageModel<P::Inputs>,
{
    if images.len() != questions.len() {
        return Err(VqaError::invalid(format!(
            "{} images but {} questions",
            images.len(),
            questions.len()
        )));
    }

    let mut answers = Vec::with_capacity(images.len());
    for (i, (image, question)) in images.iter().zip(questions).enumerate() {
        let answer = answer_multiple_choice(processor, model, image, question, options)?;
        log::debug!("[{}/{}] {} -> {}", i + 1, images.len(), image.display(), answer);
        answers.push(answer);
    }
    Ok(answers)
}
