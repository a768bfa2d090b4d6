use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{EvalError, EvalResult};

pub const DEFAULT_MODEL_ID: &str = "local-hash-768-v1";
pub const DEFAULT_MODEL_NAME: &str = "feature-hash unigram+bigram encoder";
pub const DEFAULT_EMBEDDING_DIM: usize = 768;
pub const DEFAULT_NORMALIZATION: &str = "l2";
pub const DEFAULT_BACKEND: &str = "local-hash-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticModelConfig {
    pub model_id: String,
    pub model_name: String,
    pub dimensions: usize,
    pub normalization: String,
    pub backend: String,
}

pub fn resolve_model_config(model_id: &str) -> SemanticModelConfig {
    let trimmed = model_id.trim();
    let resolved_id = if trimmed.is_empty() {
        DEFAULT_MODEL_ID
    } else {
        trimmed
    };

    let model_name = if resolved_id == DEFAULT_MODEL_ID {
        DEFAULT_MODEL_NAME
    } else {
        resolved_id
    };

    SemanticModelConfig {
        model_id: resolved_id.to_string(),
        model_name: model_name.to_string(),
        dimensions: DEFAULT_EMBEDDING_DIM,
        normalization: DEFAULT_NORMALIZATION.to_string(),
        backend: DEFAULT_BACKEND.to_string(),
    }
}

pub trait Encoder: Send + Sync {
    fn config(&self) -> &SemanticModelConfig;

    fn encode(&self, text: &str) -> EvalResult<Vec<f32>>;
}

pub type SharedEncoder = Arc<dyn Encoder>;

#[derive(Debug, Clone)]
pub struct LocalHashEncoder {
    config: SemanticModelConfig,
}

impl LocalHashEncoder {
    pub fn new(config: SemanticModelConfig) -> Self {
        Self { config }
    }
}

impl Encoder for LocalHashEncoder {
    fn config(&self) -> &SemanticModelConfig {
        &self.config
    }

    fn encode(&self, text: &str) -> EvalResult<Vec<f32>> {
        if tokenize_payload(text).is_empty() {
            return Err(EvalError::Encoding {
                text: text.to_string(),
                reason: "text has no encodable tokens".to_string(),
            });
        }
        Ok(embed_text_local(text, self.config.dimensions))
    }
}

pub fn load_encoder(model_id: &str) -> SharedEncoder {
    Arc::new(LocalHashEncoder::new(resolve_model_config(model_id)))
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn embedding_text_hash(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn embed_text_local(payload: &str, dimensions: usize) -> Vec<f32> {
    let dims = dimensions.max(8);
    let mut vector = vec![0_f32; dims];
    let tokens = tokenize_payload(payload);

    for token in tokens {
        let hash = stable_hash(&token);
        let index = (hash as usize) % dims;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
        vector[index] += sign * weight;
    }

    normalize_vector(&mut vector);
    vector
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    left.iter()
        .zip(right.iter())
        .map(|(left_value, right_value)| f64::from(*left_value) * f64::from(*right_value))
        .sum::<f64>()
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_embedding_blob(blob: &[u8], expected_dim: usize) -> Option<Vec<f32>> {
    if expected_dim == 0 || blob.len() != expected_dim.saturating_mul(4) {
        return None;
    }

    let out = blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect::<Vec<f32>>();
    Some(out)
}

fn stable_hash(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn tokenize_payload(payload: &str) -> Vec<String> {
    let words = payload
        .split_whitespace()
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|value| !value.is_empty())
        .collect::<Vec<String>>();

    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}

fn normalize_vector(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    for value in values {
        *value /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_is_deterministic_and_normalised() {
        let encoder = LocalHashEncoder::new(resolve_model_config(""));
        let first = encoder.encode("Income tax refund").expect("encode");
        let second = encoder.encode("income   tax refund").expect("encode");

        assert_eq!(first, second);
        assert_eq!(first.len(), DEFAULT_EMBEDDING_DIM);
        let self_similarity = cosine_similarity(&first, &second);
        assert!((self_similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn encoder_rejects_text_without_tokens() {
        let encoder = LocalHashEncoder::new(resolve_model_config(DEFAULT_MODEL_ID));
        let error = encoder.encode("  ,; ").expect_err("punctuation-only text");
        assert!(matches!(error, EvalError::Encoding { .. }));
    }

    #[test]
    fn embedding_blob_round_trips_and_rejects_wrong_width() {
        let values = vec![0.5_f32, -0.25, 1.0];
        let blob = encode_embedding_blob(&values);
        assert_eq!(decode_embedding_blob(&blob, 3), Some(values));
        assert_eq!(decode_embedding_blob(&blob, 4), None);
    }

    #[test]
    fn unrelated_text_scores_below_identical_text() {
        let query = embed_text_local("passport renewal", 256);
        let close = embed_text_local("passport renewal delays", 256);
        let far = embed_text_local("vehicle tax disc", 256);
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }
}
