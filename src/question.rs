//! Multiple-choice question synthesis.
//!
//! A ground-truth caption plus the position the correct answer must occupy
//! is turned into a four-option question by a hosted text-generation
//! service. The service writes the three distractors; how close they are to
//! the caption is governed by [`Difficulty`].

use crate::config::Config;
use crate::data::AnnotationTable;
use crate::error::{Result, VqaError};
use crate::llm::{ChatCompletion, LlmClient, Prompts};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Answer position in a four-option question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    A,
    B,
    C,
    D,
}

impl Label {
    pub const ALL: [Label; 4] = [Label::A, Label::B, Label::C, Label::D];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::A => "A",
            Label::B => "B",
            Label::C => "C",
            Label::D => "D",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = VqaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "A" | "a" => Ok(Label::A),
            "B" | "b" => Ok(Label::B),
            "C" | "c" => Ok(Label::C),
            "D" | "d" => Ok(Label::D),
            other => Err(VqaError::invalid(format!(
                "'{}' is not a choice label (expected A, B, C or D)",
                other
            ))),
        }
    }
}

/// How hard the generated distractors should be to tell apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = VqaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(VqaError::invalid(format!(
                "unknown difficulty '{}' (expected easy, medium or hard)",
                s
            ))),
        }
    }
}

/// A generated question together with what it was generated for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultipleChoiceQuestion {
    /// Stem and four labelled options, as returned by the service.
    pub text: String,
    /// Position of the correct option.
    pub correct: Label,
    pub difficulty: Difficulty,
}

/// Uniformly pick the position of the correct answer.
pub fn pick_random_label<R: Rng>(rng: &mut R) -> Label {
    Label::ALL[rng.random_range(0..Label::ALL.len())]
}

/// Synthesizes questions through any chat-completion backend.
pub struct QuestionSynthesizer<C> {
    client: C,
}

impl<C: ChatCompletion> QuestionSynthesizer<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Generate one question; one outbound call, no retry.
    pub async fn synthesize(
        &self,
        caption: &str,
        correct: Label,
        difficulty: Difficulty,
    ) -> Result<MultipleChoiceQuestion> {
        let prompt = Prompts::render_multiple_choice_question(caption, correct, difficulty);
        log::debug!("Synthesizing {} question, answer at {}", difficulty, correct);

        let text = self
            .client
            .complete(Some(Prompts::assistant_system()), &prompt)
            .await?;

        Ok(MultipleChoiceQuestion {
            text,
            correct,
            difficulty,
        })
    }

    /// Synthesize a question for every row and every requested level.
    ///
    /// Appends `question_<level>` and `solution_<level>` columns. The first
    /// failure aborts the run and leaves the table untouched.
    pub async fn synthesize_for_table<R: Rng>(
        &self,
        table: &mut AnnotationTable,
        caption_column: &str,
        levels: &[Difficulty],
        rng: &mut R,
    ) -> Result<()> {
        let captions = table.string_column(caption_column)?;
        let mut generated: Vec<(Difficulty, Vec<Value>, Vec<Value>)> = Vec::new();

        for &level in levels {
            let mut questions = Vec::with_capacity(captions.len());
            let mut solutions = Vec::with_capacity(captions.len());

            for (i, caption) in captions.iter().enumerate() {
                let label = pick_random_label(rng);
                let question = self.synthesize(caption, label, level).await?;
                log::info!("[{}] row {}/{}: answer {}", level, i + 1, captions.len(), label);

                questions.push(Value::String(question.text));
                solutions.push(Value::String(label.to_string()));
            }

            generated.push((level, questions, solutions));
        }

        for (level, questions, solutions) in generated {
            table.push_column(&format!("question_{}", level), questions)?;
            table.push_column(&format!("solution_{}", level), solutions)?;
        }
        Ok(())
    }
}

/// Resolve the service credential: explicit value first, then the one
/// carried by the config.
pub fn resolve_credential(explicit: Option<&str>, config: &Config) -> Result<String> {
    explicit
        .filter(|k| !k.trim().is_empty())
        .map(str::to_string)
        .or_else(|| Some(config.llm.api_key.clone()).filter(|k| !k.trim().is_empty()))
        .ok_or_else(|| {
            VqaError::Auth(format!(
                "no API key provided; pass one explicitly or set {}",
                config.llm.api_key_env
            ))
        })
}

/// One-shot question synthesis against the configured service.
///
/// Fails with [`VqaError::Auth`] before any network activity when no
/// credential can be resolved.
pub async fn synthesize_question(
    caption: &str,
    correct: Label,
    difficulty: Difficulty,
    credential: Option<&str>,
    config: &Config,
) -> Result<String> {
    let mut llm = config.llm.clone();
    llm.api_key = resolve_credential(credential, config)?;

    let synthesizer = QuestionSynthesizer::new(LlmClient::new(llm)?);
    let question = synthesizer.synthesize(caption, correct, difficulty).await?;
    Ok(question.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;

    /// Records prompts and answers with a canned question.
    struct FakeLlm {
        prompts: Mutex<Vec<(Option<String>, String)>>,
        fail: bool,
    }

    impl FakeLlm {
        fn new() -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl ChatCompletion for FakeLlm {
        async fn complete(&self, system: Option<&str>, user: &str) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((system.map(str::to_string), user.to_string()));
            if self.fail {
                return Err(VqaError::Upstream("503 Service Unavailable".to_string()));
            }
            Ok("Which of the following captions best describes the painting?\nA. x\nB. y\nC. z\nD. w".to_string())
        }
    }

    #[test]
    fn test_difficulty_parsing() {
        assert_eq!("easy".parse::<Difficulty>().unwrap(), Difficulty::Easy);
        assert_eq!(" Hard ".parse::<Difficulty>().unwrap(), Difficulty::Hard);
        assert!(matches!(
            "extreme".parse::<Difficulty>(),
            Err(VqaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_label_parsing() {
        assert_eq!("c".parse::<Label>().unwrap(), Label::C);
        assert!("E".parse::<Label>().is_err());
    }

    #[test]
    fn test_pick_random_label_is_reproducible() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        let first: Vec<Label> = (0..20).map(|_| pick_random_label(&mut a)).collect();
        let second: Vec<Label> = (0..20).map(|_| pick_random_label(&mut b)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_pick_random_label_covers_all_labels() {
        let mut rng = StdRng::seed_from_u64(42);
        let picks: Vec<Label> = (0..400).map(|_| pick_random_label(&mut rng)).collect();
        for label in Label::ALL {
            assert!(picks.contains(&label), "{} never picked", label);
        }
    }

    #[tokio::test]
    async fn test_synthesize_returns_response_verbatim() {
        let synthesizer = QuestionSynthesizer::new(FakeLlm::new());
        let question = synthesizer
            .synthesize("A harbour at dusk.", Label::B, Difficulty::Easy)
            .await
            .unwrap();

        assert!(question.text.starts_with("Which of the following"));
        assert_eq!(question.correct, Label::B);

        let prompts = synthesizer.client.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].0.as_deref(), Some("You are a helpful assistant."));
        assert!(prompts[0].1.contains("A harbour at dusk."));
        assert!(prompts[0].1.contains("choice \"B\""));
    }

    #[test]
    fn test_upstream_failure_propagates() {
        let mut llm = FakeLlm::new();
        llm.fail = true;
        let synthesizer = QuestionSynthesizer::new(llm);
        let err = tokio_test::block_on(synthesizer.synthesize(
            "caption",
            Label::A,
            Difficulty::Medium,
        ))
        .unwrap_err();
        assert!(matches!(err, VqaError::Upstream(_)));
        assert_eq!(synthesizer.client.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_network() {
        // Unroutable base URL: reaching the network would not yield Auth.
        let config = Config::with_llm("http://127.0.0.1:9", "", "gpt-4o");
        let err = synthesize_question("caption", Label::A, Difficulty::Easy, None, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, VqaError::Auth(_)));
    }

    #[test]
    fn test_explicit_credential_wins() {
        let config = Config::with_llm("https://api.example.com", "from-config", "gpt-4o");
        assert_eq!(
            resolve_credential(Some("explicit"), &config).unwrap(),
            "explicit"
        );
        assert_eq!(resolve_credential(None, &config).unwrap(), "from-config");
        assert_eq!(resolve_credential(Some(""), &config).unwrap(), "from-config");
    }

    #[tokio::test]
    async fn test_synthesize_for_table_appends_columns() {
        let mut table = AnnotationTable::from_value(
            Path::new("mem.json"),
            json!([{"caption": "one"}, {"caption": "two"}]),
        )
        .unwrap();
        let synthesizer = QuestionSynthesizer::new(FakeLlm::new());
        let mut rng = StdRng::seed_from_u64(1);

        synthesizer
            .synthesize_for_table(
                &mut table,
                "caption",
                &[Difficulty::Easy, Difficulty::Hard],
                &mut rng,
            )
            .await
            .unwrap();

        assert_eq!(
            table.columns(),
            &[
                "caption",
                "question_easy",
                "solution_easy",
                "question_hard",
                "solution_hard"
            ]
        );
        for label in table.string_column("solution_hard").unwrap() {
            assert!(label.parse::<Label>().is_ok());
        }
        assert_eq!(synthesizer.client.prompts.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_synthesize_for_table_failure_leaves_table() {
        let mut table =
            AnnotationTable::from_value(Path::new("mem.json"), json!([{"caption": "one"}]))
                .unwrap();
        let before = table.clone();
        let mut llm = FakeLlm::new();
        llm.fail = true;
        let synthesizer = QuestionSynthesizer::new(llm);
        let mut rng = StdRng::seed_from_u64(1);

        let result = synthesizer
            .synthesize_for_table(&mut table, "caption", &[Difficulty::Medium], &mut rng)
            .await;
        assert!(result.is_err());
        assert_eq!(table, before);
    }
}
