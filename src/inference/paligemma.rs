//! PaliGemma backend on candle.

use super::{ChatTurn, DeviceSpec, Processor, VisionLanguageModel};
use crate::error::{Result, VqaError};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::paligemma::{Config as PaliGemmaConfig, Model};
use hf_hub::{Repo, RepoType, api::sync::Api};
use image::RgbImage;
use image::imageops::FilterType;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

const RESPONSE_MARKER: &str = "[/INST]";

fn load_error(context: &str, err: impl std::fmt::Display) -> VqaError {
    VqaError::ModelLoad(format!("{}: {}", context, err))
}

fn inference_error(err: candle_core::Error) -> VqaError {
    VqaError::Inference(err.to_string())
}

/// Pixel values and prompt tokens for one question.
pub struct PaliGemmaInputs {
    pixel_values: Tensor,
    input_ids: Vec<u32>,
}

/// Tokenizer, chat template and image preprocessing.
pub struct PaliGemmaProcessor {
    tokenizer: Tokenizer,
    image_size: usize,
    device: Device,
    dtype: DType,
}

impl Processor for PaliGemmaProcessor {
    type Inputs = PaliGemmaInputs;

    fn apply_chat_template(&self, conversation: &[ChatTurn]) -> String {
        // PaliGemma has no chat template of its own. The [INST] wrapper only
        // delimits prompt from answer in the decoded text; image embeddings
        // are prepended by the model itself.
        conversation
            .iter()
            .map(|turn| format!("[INST] {} {}", turn.text(), RESPONSE_MARKER))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn response_marker(&self) -> &str {
        RESPONSE_MARKER
    }

    fn prepare(&self, image: &RgbImage, prompt: &str) -> Result<PaliGemmaInputs> {
        let size = self.image_size as u32;
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);

        // HWC u8 -> 1xCxHxW in [-1, 1]
        let pixel_values = Tensor::from_vec(
            resized.into_raw(),
            (self.image_size, self.image_size, 3),
            &Device::Cpu,
        )
        .and_then(|t| t.permute((2, 0, 1)))
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| t.affine(2. / 255., -1.))
        .and_then(|t| t.to_dtype(self.dtype))
        .and_then(|t| t.to_device(&self.device))
        .and_then(|t| t.unsqueeze(0))
        .map_err(inference_error)?;

        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| VqaError::Inference(format!("tokenization failed: {}", e)))?;

        Ok(PaliGemmaInputs {
            pixel_values,
            input_ids: encoding.get_ids().to_vec(),
        })
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|e| VqaError::Inference(format!("decoding failed: {}", e)))
    }
}

/// Greedy autoregressive generation with a KV cache.
pub struct PaliGemmaModel {
    model: Model,
    device: Device,
    eos_token: u32,
    logits_processor: LogitsProcessor,
}

impl VisionLanguageModel<PaliGemmaInputs> for PaliGemmaModel {
    fn generate(&mut self, inputs: &PaliGemmaInputs, max_new_tokens: usize) -> Result<Vec<u32>> {
        self.model.clear_kv_cache();

        let mut tokens = inputs.input_ids.clone();
        let prompt_len = tokens.len();
        let start = std::time::Instant::now();

        for index in 0..max_new_tokens {
            let context_size = if index > 0 { 1 } else { tokens.len() };
            let start_pos = tokens.len().saturating_sub(context_size);
            let input = Tensor::new(&tokens[start_pos..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(inference_error)?;

            let logits = if index > 0 {
                self.model.forward(&input)
            } else {
                self.model.setup(&inputs.pixel_values, &input)
            }
            .map_err(inference_error)?;

            let logits = logits
                .squeeze(0)
                .and_then(|l| l.squeeze(0))
                .and_then(|l| l.to_dtype(DType::F32))
                .map_err(inference_error)?;

            let next_token = self
                .logits_processor
                .sample(&logits)
                .map_err(inference_error)?;
            if next_token == self.eos_token {
                break;
            }
            tokens.push(next_token);
        }

        let generated = tokens.len() - prompt_len;
        log::debug!(
            "{} tokens generated ({:.2} token/s)",
            generated,
            generated as f64 / start.elapsed().as_secs_f64().max(f64::EPSILON)
        );
        Ok(tokens)
    }
}

/// Tokenizer and weight files of a pretrained model.
struct ModelFiles {
    tokenizer: PathBuf,
    weights: Vec<PathBuf>,
}

fn local_files(dir: &Path) -> Result<ModelFiles> {
    let tokenizer = dir.join("tokenizer.json");
    if !tokenizer.is_file() {
        return Err(VqaError::ModelLoad(format!(
            "'{}' has no tokenizer.json",
            dir.display()
        )));
    }

    let entries = std::fs::read_dir(dir).map_err(|e| VqaError::io(dir, e))?;
    let mut weights: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("safetensors"))
        .collect();
    weights.sort();

    if weights.is_empty() {
        return Err(VqaError::ModelLoad(format!(
            "'{}' has no .safetensors weights",
            dir.display()
        )));
    }

    Ok(ModelFiles { tokenizer, weights })
}

fn hub_files(model_id: &str) -> Result<ModelFiles> {
    let api = Api::new().map_err(|e| load_error("failed to create HF Hub API", e))?;
    let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

    let tokenizer = repo
        .get("tokenizer.json")
        .map_err(|e| load_error("failed to get tokenizer.json", e))?;

    let weights = match repo.get("model.safetensors.index.json") {
        Ok(index_path) => {
            let index = std::fs::read_to_string(&index_path)
                .map_err(|e| VqaError::io(&index_path, e))?;
            let index: serde_json::Value = serde_json::from_str(&index)
                .map_err(|e| load_error("corrupt safetensors index", e))?;
            let shards: BTreeSet<String> = index["weight_map"]
                .as_object()
                .ok_or_else(|| VqaError::ModelLoad("safetensors index has no weight_map".into()))?
                .values()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();

            shards
                .iter()
                .map(|shard| {
                    repo.get(shard)
                        .map_err(|e| load_error(&format!("failed to get {}", shard), e))
                })
                .collect::<Result<Vec<_>>>()?
        }
        Err(_) => vec![
            repo.get("model.safetensors")
                .map_err(|e| load_error("failed to get model weights", e))?,
        ],
    };

    Ok(ModelFiles { tokenizer, weights })
}

fn candle_device(spec: DeviceSpec) -> Result<Device> {
    match spec {
        DeviceSpec::Cpu => Ok(Device::Cpu),
        DeviceSpec::Cuda(i) => {
            Device::new_cuda(i).map_err(|e| load_error(&format!("device {} unavailable", spec), e))
        }
        DeviceSpec::Metal(i) => {
            Device::new_metal(i).map_err(|e| load_error(&format!("device {} unavailable", spec), e))
        }
    }
}

/// Load a PaliGemma checkpoint from a local directory or hub id.
///
/// `quantize` loads BF16 weights on accelerators; CPU inference stays in F32.
pub fn load_model(
    path: &str,
    device: &str,
    quantize: bool,
) -> Result<(PaliGemmaProcessor, PaliGemmaModel)> {
    let spec: DeviceSpec = device.parse()?;
    let device = candle_device(spec)?;

    let dtype = match (quantize, spec.is_accelerator()) {
        (true, true) => DType::BF16,
        (true, false) => {
            log::warn!("Reduced precision is not supported on CPU, loading F32 weights");
            DType::F32
        }
        (false, _) => DType::F32,
    };

    let local = Path::new(path);
    let files = if local.is_dir() {
        local_files(local)?
    } else {
        hub_files(path)?
    };

    let tokenizer = Tokenizer::from_file(&files.tokenizer)
        .map_err(|e| load_error("failed to load tokenizer", e))?;
    let eos_token = tokenizer
        .token_to_id("<eos>")
        .ok_or_else(|| VqaError::ModelLoad("tokenizer has no <eos> token".into()))?;

    let (config, image_size) = if path.contains("448") {
        (PaliGemmaConfig::paligemma_3b_448(), 448)
    } else {
        (PaliGemmaConfig::paligemma_3b_224(), 224)
    };

    log::info!(
        "Loading {} ({} weight files) on {} as {:?}",
        path,
        files.weights.len(),
        spec,
        dtype
    );

    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&files.weights, dtype, &device)
            .map_err(|e| load_error("failed to load model weights", e))?
    };
    let model = Model::new(&config, vb).map_err(|e| load_error("failed to build PaliGemma", e))?;

    let processor = PaliGemmaProcessor {
        tokenizer,
        image_size,
        device: device.clone(),
        dtype,
    };
    let model = PaliGemmaModel {
        model,
        device,
        eos_token,
        logits_processor: LogitsProcessor::new(299792458, None, None),
    };

    Ok((processor, model))
}
