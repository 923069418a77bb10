use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::SynthesisError;

/// Logical name every unknown voice falls back to.
pub const DEFAULT_VOICE: &str = "default";

/// Static logical-name to model-name mapping plus the directory the model
/// files live in. Loaded once at startup, read-only afterwards.
#[derive(Debug, Clone)]
pub struct VoiceRegistry {
    voices: BTreeMap<String, String>,
    model_dir: PathBuf,
}

impl VoiceRegistry {
    pub fn new(voices: BTreeMap<String, String>, model_dir: impl Into<PathBuf>) -> Self {
        Self {
            voices,
            model_dir: model_dir.into(),
        }
    }

    /// Built-in mapping matching the deployed voice set.
    pub fn with_defaults(model_dir: impl Into<PathBuf>) -> Self {
        let mut voices = BTreeMap::new();
        voices.insert("default".to_string(), "en_US-lessac-medium".to_string());
        voices.insert("female".to_string(), "en_US-lessac-medium".to_string());
        voices.insert("male".to_string(), "en_US-lessac-medium".to_string());
        Self::new(voices, model_dir)
    }

    /// Load from a JSON map file of `{ "logical-name": "model-name" }`.
    pub fn from_mapfile(
        path: impl AsRef<Path>,
        model_dir: impl Into<PathBuf>,
    ) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to load {}", path.as_ref().display()))?;
        let voices: BTreeMap<String, String> =
            serde_json::from_str(&text).with_context(|| "voice map is not a JSON object of strings")?;
        Ok(Self::new(voices, model_dir))
    }

    /// Resolve a logical voice name to a model file path.
    ///
    /// Unknown names fall back to the default voice rather than failing;
    /// only a missing default mapping is an error.
    pub fn resolve(&self, logical: &str) -> Result<PathBuf, SynthesisError> {
        let model = match self.voices.get(logical) {
            Some(model) => model,
            None => self
                .voices
                .get(DEFAULT_VOICE)
                .ok_or(SynthesisError::NoDefaultConfigured)?,
        };
        Ok(self.model_dir.join(format!("{model}.onnx")))
    }

    /// The static logical mapping, for the voices listing.
    pub fn logical_map(&self) -> &BTreeMap<String, String> {
        &self.voices
    }

    /// Model stems actually present on disk.
    pub fn available_models(&self) -> Vec<String> {
        let mut models = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.model_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|x| x == "onnx") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        models.push(stem.to_string());
                    }
                }
            }
        }
        models.sort();
        models
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_known_voice() {
        let registry = VoiceRegistry::with_defaults("/app/voices");
        let path = registry.resolve("female").unwrap();
        assert_eq!(path, PathBuf::from("/app/voices/en_US-lessac-medium.onnx"));
    }

    #[test]
    fn test_unknown_voice_falls_back_to_default() {
        let mut voices = BTreeMap::new();
        voices.insert("default".to_string(), "base-model".to_string());
        let registry = VoiceRegistry::new(voices, "/app/voices");

        let path = registry.resolve("no-such-voice").unwrap();
        assert_eq!(path, PathBuf::from("/app/voices/base-model.onnx"));
    }

    #[test]
    fn test_missing_default_is_an_error() {
        let registry = VoiceRegistry::new(BTreeMap::new(), "/app/voices");
        assert!(matches!(
            registry.resolve("anything"),
            Err(SynthesisError::NoDefaultConfigured)
        ));
    }

    #[test]
    fn test_available_models_lists_onnx_stems() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("en_US-lessac-medium.onnx"), b"m").unwrap();
        fs::write(dir.path().join("de_DE-thorsten.onnx"), b"m").unwrap();
        fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

        let registry = VoiceRegistry::with_defaults(dir.path());
        assert_eq!(
            registry.available_models(),
            vec!["de_DE-thorsten", "en_US-lessac-medium"]
        );
    }
}
