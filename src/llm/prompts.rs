//! LLM prompts for multiple-choice question synthesis.

use crate::question::{Difficulty, Label};

/// Collection of prompts used for question synthesis.
pub struct Prompts;

impl Prompts {
    /// System message sent with every synthesis request.
    pub fn assistant_system() -> &'static str {
        "You are a helpful assistant."
    }

    /// Title every generated question must carry.
    pub fn question_title() -> &'static str {
        "Which of the following captions best describes the painting?"
    }

    /// Distractor-quality instruction for a difficulty level.
    pub fn distractor_quality(level: Difficulty) -> &'static str {
        match level {
            Difficulty::Easy => {
                "The distractors are obviously incorrect but still loosely related to the context."
            }
            Difficulty::Medium => {
                "The distractors are somewhat related to the context but contain inaccuracies or non-fluent language."
            }
            Difficulty::Hard => {
                "The distractors are closely related to the context but may confuse someone without careful observation."
            }
        }
    }

    /// Prompt asking for three distractors around a ground-truth caption.
    pub fn multiple_choice_question() -> &'static str {
        r#"Given the ground truth caption below:
"{caption}"
Generate three plausible but incorrect distractors.
"{level_message}"
Format the result as a multiple-choice question.
Question title should be "{title}".
The correct choice should be placed at choice "{correct_choice}".
Do not generate special symbols such as '*'."#
    }

    /// Fill the question-synthesis prompt.
    pub fn render_multiple_choice_question(
        caption: &str,
        correct_choice: Label,
        level: Difficulty,
    ) -> String {
        Self::multiple_choice_question()
            .replace("{title}", Self::question_title())
            .replace("{level_message}", Self::distractor_quality(level))
            .replace("{correct_choice}", correct_choice.as_str())
            // Caption last so braces inside it are never treated as placeholders.
            .replace("{caption}", caption)
    }

    /// Instruction appended to every question shown to the vision model.
    pub fn single_letter_instruction() -> &'static str {
        "Only return the correct choice with a single letter."
    }
}
