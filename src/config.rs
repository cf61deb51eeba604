use crate::error::IntakeError;
use serde::Deserialize;
use std::{fs, path::Path};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    #[serde(default)]
    pub ocr: OcrConfig,
}

fn default_db_path() -> String {
    "receipts.db".to_string()
}

fn default_upload_dir() -> String {
    "static/uploads".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OcrConfig {
    pub tesseract_cmd: String,
    pub pdftoppm_cmd: String,
    pub language: String,
    pub dpi: u32,
    /// Below this many non-whitespace characters a text layer counts as empty.
    pub min_text_chars: usize,
    /// Try the PDF's embedded text before running OCR.
    pub prefer_text_layer: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_cmd: "tesseract".to_string(),
            pdftoppm_cmd: "pdftoppm".to_string(),
            language: "eng".to_string(),
            dpi: 300,
            min_text_chars: 30,
            prefer_text_layer: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            upload_dir: default_upload_dir(),
            ocr: OcrConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IntakeError> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| IntakeError::Config(e.to_string()))
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, IntakeError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
