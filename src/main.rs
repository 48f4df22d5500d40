//! VQA Mix CLI
//!
//! Question synthesis, VLM answering, evaluation and image augmentation
//! for multiple-choice VQA datasets.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use std::time::Instant;
use vqa_mix::{
    augment::{Augmentation, apply_augmentations, load_image, save_image},
    config::Config,
    data::{load_annotations_as_table, save_structured, table_to_records},
    eval::{
        DEFAULT_LABELS, accuracy_by_category, confusion_matrix, plot_accuracy_comparison,
        plot_confusion_matrix,
    },
    llm::LlmClient,
    question::{Difficulty, QuestionSynthesizer, resolve_credential},
};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// VQA Mix - multiple-choice visual question answering toolkit
#[derive(Parser)]
#[command(name = "vqa-mix")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate multiple-choice questions from image captions
    Generate {
        /// Path to the annotation file (JSON)
        annotations: PathBuf,

        /// Column holding the captions
        #[arg(long, default_value = "caption")]
        caption_column: String,

        /// Difficulty levels to generate, comma separated
        #[arg(long, value_delimiter = ',', default_value = "easy,medium,hard")]
        levels: Vec<Difficulty>,

        /// Only process the first N rows
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Seed for the correct-answer letters
        #[arg(long)]
        seed: Option<u64>,

        /// API key (overrides config and environment)
        #[arg(long)]
        api_key: Option<String>,

        /// Output path for the annotated records
        #[arg(short, long, default_value = "data/questions.json")]
        output: PathBuf,
    },

    /// Answer generated questions with a vision-language model
    Infer {
        /// Path to the annotation file with questions (JSON)
        annotations: PathBuf,

        /// Column holding image paths
        #[arg(long, default_value = "image_path")]
        image_column: String,

        /// Column holding the questions
        #[arg(long, default_value = "question_medium")]
        question_column: String,

        /// Column to write the answers to
        #[arg(long, default_value = "prediction_medium")]
        output_column: String,

        /// Directory that relative image paths are resolved against
        #[arg(long)]
        image_root: Option<PathBuf>,

        /// Model directory or hub id (overrides config)
        #[arg(long)]
        model: Option<String>,

        /// Device, e.g. cpu, cuda:0, metal (overrides config)
        #[arg(long)]
        device: Option<String>,

        /// Only process the first N rows
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Output path for the annotated records
        #[arg(short, long, default_value = "data/predictions.json")]
        output: PathBuf,
    },

    /// Score predictions and render charts
    Evaluate {
        /// Path to the annotation file with predictions (JSON)
        annotations: PathBuf,

        /// Column holding the correct letters
        #[arg(long, default_value = "solution_medium")]
        truth_column: String,

        /// Prediction columns as NAME=COLUMN, repeatable
        #[arg(short, long = "predictions", required = true)]
        predictions: Vec<String>,

        /// Directory for the report and figures
        #[arg(long, default_value = "results")]
        out_dir: PathBuf,
    },

    /// Write augmented copies of every image in a directory
    Augment {
        /// Directory to read images from (recursively)
        input_dir: PathBuf,

        /// Directory to write augmented images to
        output_dir: PathBuf,

        /// Brightness factor (1.0 = unchanged)
        #[arg(long)]
        brightness: Option<f64>,

        /// Contrast factor (1.0 = unchanged)
        #[arg(long)]
        contrast: Option<f64>,

        /// Gaussian blur radius
        #[arg(long)]
        blur: Option<f32>,

        /// Gaussian noise variance
        #[arg(long)]
        noise: Option<f64>,

        /// Counter-clockwise rotation in degrees
        #[arg(long)]
        rotate: Option<f64>,

        /// Seed for the noise generator
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Test LLM connection
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            annotations,
            caption_column,
            levels,
            limit,
            seed,
            api_key,
            output,
        } => {
            cmd_generate(
                annotations,
                caption_column,
                levels,
                limit,
                seed,
                api_key,
                output,
            )
            .await
        }
        Commands::Infer {
            annotations,
            image_column,
            question_column,
            output_column,
            image_root,
            model,
            device,
            limit,
            output,
        } => cmd_infer(InferArgs {
            annotations,
            image_column,
            question_column,
            output_column,
            image_root,
            model,
            device,
            limit,
            output,
        }),
        Commands::Evaluate {
            annotations,
            truth_column,
            predictions,
            out_dir,
        } => cmd_evaluate(annotations, truth_column, predictions, out_dir),
        Commands::Augment {
            input_dir,
            output_dir,
            brightness,
            contrast,
            blur,
            noise,
            rotate,
            seed,
        } => {
            let steps = augmentation_steps(brightness, contrast, blur, noise, rotate);
            cmd_augment(input_dir, output_dir, steps, seed)
        }
        Commands::Test => cmd_test().await,
    }
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

async fn cmd_generate(
    annotations: PathBuf,
    caption_column: String,
    levels: Vec<Difficulty>,
    limit: Option<usize>,
    seed: Option<u64>,
    api_key: Option<String>,
    output: PathBuf,
) -> Result<()> {
    println!("Loading configuration...");
    let mut config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    config.llm.api_key = resolve_credential(api_key.as_deref(), &config)?;

    let mut table =
        load_annotations_as_table(&annotations).context("Failed to load annotations")?;
    if let Some(n) = limit {
        table = table.take(n);
    }

    println!(
        "Generating {} question(s) per caption for {} rows",
        levels.len(),
        table.len()
    );
    println!("Using model: {}", config.llm.model);

    let start = Instant::now();
    let synthesizer = QuestionSynthesizer::new(LlmClient::new(config.llm)?);
    let mut rng = seeded_rng(seed);
    synthesizer
        .synthesize_for_table(&mut table, &caption_column, &levels, &mut rng)
        .await
        .context("Question generation failed")?;

    table_to_records(&table, &output).context("Failed to save questions")?;

    println!(
        "\nGenerated {} questions in {:.2?}",
        table.len() * levels.len(),
        start.elapsed()
    );
    println!("Saved to: {}", output.display());

    Ok(())
}

#[cfg_attr(not(feature = "vlm"), allow(dead_code))]
struct InferArgs {
    annotations: PathBuf,
    image_column: String,
    question_column: String,
    output_column: String,
    image_root: Option<PathBuf>,
    model: Option<String>,
    device: Option<String>,
    limit: Option<usize>,
    output: PathBuf,
}

#[cfg(feature = "vlm")]
fn cmd_infer(args: InferArgs) -> Result<()> {
    use vqa_mix::inference::{InferenceOptions, batch_answer, load_model};

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(model) = args.model {
        config.model.path = model;
    }
    if let Some(device) = args.device {
        config.model.device = device;
    }

    let mut table =
        load_annotations_as_table(&args.annotations).context("Failed to load annotations")?;
    if let Some(n) = args.limit {
        table = table.take(n);
    }

    let images: Vec<PathBuf> = table
        .string_column(&args.image_column)?
        .into_iter()
        .map(|p| match &args.image_root {
            Some(root) => root.join(p),
            None => PathBuf::from(p),
        })
        .collect();
    let questions = table.string_column(&args.question_column)?;

    println!(
        "Loading model {} on {}...",
        config.model.path, config.model.device
    );
    let (processor, mut model) = load_model(
        &config.model.path,
        &config.model.device,
        config.model.quantize,
    )
    .context("Failed to load model")?;

    let options = InferenceOptions {
        max_new_tokens: config.model.max_new_tokens,
    };

    let start = Instant::now();
    let answers = batch_answer(&processor, &mut model, &images, &questions, &options)
        .context("Inference failed")?;

    table.push_column(
        &args.output_column,
        answers.into_iter().map(serde_json::Value::String).collect(),
    )?;
    table_to_records(&table, &args.output).context("Failed to save predictions")?;

    println!("\nAnswered {} questions in {:.2?}", table.len(), start.elapsed());
    println!("Saved to: {}", args.output.display());

    Ok(())
}

#[cfg(not(feature = "vlm"))]
fn cmd_infer(_args: InferArgs) -> Result<()> {
    anyhow::bail!("Model inference is not available: rebuild with `--features vlm`");
}

fn parse_prediction_spec(spec: &str) -> Result<(String, String)> {
    match spec.split_once('=') {
        Some((name, column)) if !name.is_empty() && !column.is_empty() => {
            Ok((name.to_string(), column.to_string()))
        }
        _ => anyhow::bail!("Invalid prediction spec '{}', expected NAME=COLUMN", spec),
    }
}

fn cmd_evaluate(
    annotations: PathBuf,
    truth_column: String,
    predictions: Vec<String>,
    out_dir: PathBuf,
) -> Result<()> {
    let prediction_columns = predictions
        .iter()
        .map(|spec| parse_prediction_spec(spec))
        .collect::<Result<Vec<_>>>()?;

    let table = load_annotations_as_table(&annotations).context("Failed to load annotations")?;
    let report = accuracy_by_category(&table, &prediction_columns, &truth_column)
        .context("Failed to compute accuracy")?;

    println!("Accuracy ({} rows)", table.len());
    println!("{}", "─".repeat(40));
    for (name, score) in report.iter() {
        println!("  {:<20} {:>7.2}%", name, score * 100.0);
    }
    println!();

    save_structured(&report, &out_dir.join("accuracy.json"))
        .context("Failed to save accuracy report")?;

    let figure = plot_accuracy_comparison(&report, "Accuracy Comparison")?;
    write_figure(&figure.render_svg()?, &out_dir.join("accuracy_comparison.svg"))?;

    let truth = table.string_column(&truth_column)?;
    for (name, column) in &prediction_columns {
        let predicted = table.string_column(column)?;
        let matrix = confusion_matrix(&predicted, &truth, &DEFAULT_LABELS)?;
        let figure = plot_confusion_matrix(&matrix, &format!("Confusion Matrix ({})", name))?;
        write_figure(
            &figure.render_svg()?,
            &out_dir.join(format!("confusion_matrix_{}.svg", name)),
        )?;
    }

    println!("Report and figures saved to: {}", out_dir.display());
    Ok(())
}

fn write_figure(svg: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, svg).with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("Figure saved to {}", path.display());
    Ok(())
}

/// `None` when no flag is given, which selects the default chain.
fn augmentation_steps(
    brightness: Option<f64>,
    contrast: Option<f64>,
    blur: Option<f32>,
    noise: Option<f64>,
    rotate: Option<f64>,
) -> Option<Vec<Augmentation>> {
    let mut steps = Vec::new();
    if brightness.is_some() || contrast.is_some() {
        steps.push(Augmentation::BrightnessContrast {
            brightness: brightness.unwrap_or(1.0),
            contrast: contrast.unwrap_or(1.0),
        });
    }
    if let Some(radius) = blur {
        steps.push(Augmentation::Blur { radius });
    }
    if let Some(variance) = noise {
        steps.push(Augmentation::Noise { variance });
    }
    if let Some(degrees) = rotate {
        steps.push(Augmentation::Rotate { degrees });
    }

    if steps.is_empty() { None } else { Some(steps) }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn cmd_augment(
    input_dir: PathBuf,
    output_dir: PathBuf,
    steps: Option<Vec<Augmentation>>,
    seed: Option<u64>,
) -> Result<()> {
    if !input_dir.is_dir() {
        anyhow::bail!("Input directory '{}' not found", input_dir.display());
    }

    let mut rng = seeded_rng(seed);
    let start = Instant::now();
    let mut count = 0usize;

    for entry in WalkDir::new(&input_dir).sort_by_file_name() {
        let entry = entry.context("Failed to walk input directory")?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_image(path) {
            continue;
        }

        let relative = path.strip_prefix(&input_dir).unwrap_or(path);
        let target = output_dir.join(relative);

        let image = load_image(path)?;
        let augmented = apply_augmentations(&image, steps.as_deref(), &mut rng)?;
        save_image(&augmented, &target)?;

        log::debug!("{} -> {}", path.display(), target.display());
        count += 1;
    }

    println!(
        "Augmented {} images in {:.2?}, saved to: {}",
        count,
        start.elapsed(),
        output_dir.display()
    );
    Ok(())
}

async fn cmd_test() -> Result<()> {
    println!("Testing LLM connection...\n");

    let config = Config::load().context("Failed to load configuration")?;

    println!("Configuration:");
    println!("  API Base:  {}", config.llm.api_base);
    println!("  Model:     {}", config.llm.model);
    println!(
        "  API Key:   {}...",
        config.llm.api_key.chars().take(8).collect::<String>()
    );
    println!();

    if let Err(e) = config.validate() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let client = match LlmClient::new(config.llm) {
        Ok(client) => client,
        Err(e) => {
            println!("Configuration error: {}", e);
            return Ok(());
        }
    };

    println!("Sending test request...");
    match client.test_connection().await {
        Ok(()) => println!("Connection successful!"),
        Err(e) => println!("Connection failed: {}", e),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prediction_spec() {
        assert_eq!(
            parse_prediction_spec("easy=prediction_easy").unwrap(),
            ("easy".to_string(), "prediction_easy".to_string())
        );
        assert!(parse_prediction_spec("easy").is_err());
        assert!(parse_prediction_spec("=col").is_err());
    }

    #[test]
    fn test_augmentation_steps() {
        assert!(augmentation_steps(None, None, None, None, None).is_none());

        let steps = augmentation_steps(Some(1.3), None, None, Some(4.0), Some(15.0)).unwrap();
        assert_eq!(
            steps,
            vec![
                Augmentation::BrightnessContrast {
                    brightness: 1.3,
                    contrast: 1.0
                },
                Augmentation::Noise { variance: 4.0 },
                Augmentation::Rotate { degrees: 15.0 },
            ]
        );
    }

    #[test]
    fn test_is_image() {
        assert!(is_image(Path::new("a/b/photo.JPG")));
        assert!(is_image(Path::new("x.png")));
        assert!(!is_image(Path::new("notes.txt")));
        assert!(!is_image(Path::new("noext")));
    }

    #[test]
    fn test_cli_parses_levels() {
        let cli = Cli::try_parse_from(["vqa-mix", "generate", "ann.json", "--levels", "easy,hard"])
            .unwrap();
        match cli.command {
            Commands::Generate { levels, .. } => {
                assert_eq!(levels, vec![Difficulty::Easy, Difficulty::Hard])
            }
            _ => panic!("expected generate"),
        }
    }
}
