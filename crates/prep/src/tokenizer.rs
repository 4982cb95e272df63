//! Text → token id sequences.

use std::path::Path;

use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::info;

use crate::{PrepError, PrepareDataConfig};

/// Anything that turns text into token ids.
pub trait TextTokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>, PrepError>;

    /// Id used to pad short sequences.
    fn pad_id(&self) -> u32;
}

/// A Hugging Face tokenizer that truncates and pads every encoding to a
/// fixed length, keeping its special tokens.
pub struct HfTokenizer {
    inner: Tokenizer,
    pad_id: u32,
}

impl HfTokenizer {
    /// Load a local `tokenizer.json`.
    pub fn from_file(path: impl AsRef<Path>, max_len: usize) -> Result<Self, PrepError> {
        let path = path.as_ref();
        let inner = Tokenizer::from_file(path)
            .map_err(|e| PrepError::Tokenizer(format!("cannot load {}: {e}", path.display())))?;
        Self::fixed(inner, max_len, &path.display().to_string())
    }

    /// Fetch the tokenizer of a pretrained model from the Hugging Face Hub.
    /// Blocks on network IO.
    pub fn from_pretrained(model: &str, max_len: usize) -> Result<Self, PrepError> {
        let inner = Tokenizer::from_pretrained(model, None)
            .map_err(|e| PrepError::Tokenizer(format!("cannot fetch tokenizer of {model}: {e}")))?;
        Self::fixed(inner, max_len, model)
    }

    /// The local file when `tokenizer_path` is set, otherwise the pretrained
    /// tokenizer of `model_name`.
    pub fn for_config(config: &PrepareDataConfig) -> Result<Self, PrepError> {
        match &config.tokenizer_path {
            Some(path) => Self::from_file(path, config.max_sequence_length),
            None => Self::from_pretrained(&config.model_name, config.max_sequence_length),
        }
    }

    fn fixed(mut inner: Tokenizer, max_len: usize, source: &str) -> Result<Self, PrepError> {
        let pad_token = inner
            .get_padding()
            .map(|p| p.pad_token.clone())
            .unwrap_or_else(|| "[PAD]".to_owned());
        let pad_id = inner
            .get_padding()
            .map(|p| p.pad_id)
            .or_else(|| inner.token_to_id(&pad_token))
            .unwrap_or(0);

        inner
            .with_truncation(Some(TruncationParams {
                max_length: max_len,
                ..TruncationParams::default()
            }))
            .map_err(|e| PrepError::Tokenizer(e.to_string()))?;
        inner.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_len),
            pad_id,
            pad_token,
            ..PaddingParams::default()
        }));

        info!(source, pad_id, max_len, vocab = inner.get_vocab_size(true), "tokenizer loaded");
        Ok(Self { inner, pad_id })
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, PrepError> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| PrepError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn pad_id(&self) -> u32 {
        self.pad_id
    }
}

/// Truncate or pad `ids` to exactly `max_len` entries, for tokenizers that
/// do not fix the length themselves.
pub fn fixed_length(mut ids: Vec<u32>, max_len: usize, pad_id: u32) -> Vec<i64> {
    ids.resize(max_len, pad_id);
    ids.into_iter().map(i64::from).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A word-level BERT-style tokenizer: `[CLS] words [SEP]`, `[PAD]` = 0.
    pub(crate) const WORD_LEVEL_JSON: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": {
            "type": "TemplateProcessing",
            "single": [
                { "SpecialToken": { "id": "[CLS]", "type_id": 0 } },
                { "Sequence": { "id": "A", "type_id": 0 } },
                { "SpecialToken": { "id": "[SEP]", "type_id": 0 } }
            ],
            "pair": [
                { "Sequence": { "id": "A", "type_id": 0 } },
                { "Sequence": { "id": "B", "type_id": 1 } }
            ],
            "special_tokens": {
                "[CLS]": { "id": "[CLS]", "ids": [2], "tokens": ["[CLS]"] },
                "[SEP]": { "id": "[SEP]", "ids": [3], "tokens": ["[SEP]"] }
            }
        },
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": { "[PAD]": 0, "[UNK]": 1, "[CLS]": 2, "[SEP]": 3, "a": 4, "b": 5, "c": 6, "d": 7 },
            "unk_token": "[UNK]"
        }
    }"#;

    pub(crate) fn word_level_file(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("tokenizer.json");
        std::fs::write(&path, WORD_LEVEL_JSON).unwrap();
        path
    }

    #[test]
    fn short_sequences_are_padded() {
        assert_eq!(fixed_length(vec![101, 5, 102], 5, 0), vec![101, 5, 102, 0, 0]);
    }

    #[test]
    fn long_sequences_are_truncated() {
        assert_eq!(fixed_length(vec![1, 2, 3, 4], 2, 0), vec![1, 2]);
        assert_eq!(fixed_length(vec![1, 2], 2, 9), vec![1, 2]);
    }

    #[test]
    fn missing_tokenizer_file_is_reported() {
        let err = HfTokenizer::from_file("/nonexistent/tokenizer.json", 8).err().unwrap();
        assert!(matches!(err, PrepError::Tokenizer(msg) if msg.contains("/nonexistent")));
    }

    #[test]
    fn truncation_keeps_the_closing_special_token() {
        let dir = tempfile::tempdir().unwrap();
        let tokenizer = HfTokenizer::from_file(word_level_file(dir.path()), 4).unwrap();

        assert_eq!(tokenizer.encode("a b c d").unwrap(), vec![2, 4, 5, 3]);
    }

    #[test]
    fn short_text_is_padded_with_the_pad_token() {
        let dir = tempfile::tempdir().unwrap();
        let tokenizer = HfTokenizer::from_file(word_level_file(dir.path()), 5).unwrap();

        assert_eq!(tokenizer.pad_id(), 0);
        assert_eq!(tokenizer.encode("a zzz").unwrap(), vec![2, 4, 1, 3, 0]);
    }

    #[test]
    fn config_with_a_path_loads_the_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let config: PrepareDataConfig = serde_json::from_value(serde_json::json!({
            "output_dir": dir.path(),
            "dataset_name": "train",
            "label_map": {},
            "tokenizer_path": word_level_file(dir.path()),
            "max_sequence_length": 3,
        }))
        .unwrap();

        let tokenizer = HfTokenizer::for_config(&config).unwrap();
        assert_eq!(tokenizer.encode("b").unwrap(), vec![2, 5, 3]);
    }
}
