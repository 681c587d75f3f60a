use crate::amount_normalizer::AmountPolicy;
use crate::error::ConfigError;
use crate::export::{CsvLayout, DateOrder};
use crate::model::TransactionKind;
use crate::ocr::{DEFAULT_PDFTOPPM_CMD, DEFAULT_TESSERACT_CMD};
use crate::pdf_import::DEFAULT_MIN_PAGE_TEXT_CHARS;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_DB_PATH: &str = "statement_jobs.db";
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// Pipeline settings read from a TOML file. Every section and field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ocr: OcrConfig,
    pub amounts: AmountsConfig,
    pub export: ExportConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub tesseract_cmd: String,
    pub pdftoppm_cmd: String,
    /// Pages whose text layer is shorter than this are sent to OCR.
    pub min_page_text_chars: usize,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_cmd: DEFAULT_TESSERACT_CMD.to_string(),
            pdftoppm_cmd: DEFAULT_PDFTOPPM_CMD.to_string(),
            min_page_text_chars: DEFAULT_MIN_PAGE_TEXT_CHARS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AmountsConfig {
    pub unsigned_text_default: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub layout: Option<String>,
    pub date_order: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub rules_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Missing file path means defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.resolve_amount_policy()?;
        self.resolve_layout(None)?;
        self.resolve_date_order(None)?;
        if self.ocr.tesseract_cmd.trim().is_empty() || self.ocr.pdftoppm_cmd.trim().is_empty() {
            return Err(ConfigError::Invalid("ocr commands must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn resolve_amount_policy(&self) -> Result<AmountPolicy, ConfigError> {
        let unsigned_text_default = match self.amounts.unsigned_text_default.as_deref() {
            None => AmountPolicy::default().unsigned_text_default,
            Some(raw) => parse_kind(raw)?,
        };
        Ok(AmountPolicy {
            unsigned_text_default,
        })
    }

    /// `flag` wins over the file value.
    pub fn resolve_layout(&self, flag: Option<&str>) -> Result<CsvLayout, ConfigError> {
        match flag.or(self.export.layout.as_deref()) {
            None => Ok(CsvLayout::default()),
            Some(raw) => CsvLayout::parse(raw)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown csv layout: {raw}"))),
        }
    }

    pub fn resolve_date_order(&self, flag: Option<&str>) -> Result<DateOrder, ConfigError> {
        match flag.or(self.export.date_order.as_deref()) {
            None => Ok(DateOrder::default()),
            Some(raw) => DateOrder::parse(raw)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown date order: {raw}"))),
        }
    }

    pub fn resolve_db_path(&self, flag: Option<&Path>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.paths.db_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
    }

    pub fn resolve_output_dir(&self, flag: Option<&Path>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.paths.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }

    pub fn resolve_rules_dir(&self, flag: Option<&Path>) -> Option<PathBuf> {
        flag.map(Path::to_path_buf)
            .or_else(|| self.paths.rules_dir.clone())
    }
}

fn parse_kind(raw: &str) -> Result<TransactionKind, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "debit" => Ok(TransactionKind::Debit),
        "credit" => Ok(TransactionKind::Credit),
        other => Err(ConfigError::Invalid(format!(
            "unsigned_text_default must be debit or credit, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn empty_file_gives_defaults() {
        let config = PipelineConfig::from_toml_str("").expect("parse empty");
        assert_eq!(config.ocr.min_page_text_chars, 100);
        assert_eq!(config.ocr.tesseract_cmd, "tesseract");
        assert_eq!(
            config.resolve_amount_policy().expect("policy").unsigned_text_default,
            TransactionKind::Debit
        );
        assert_eq!(config.resolve_layout(None).expect("layout"), CsvLayout::ThreeColumn);
        assert_eq!(config.resolve_db_path(None), PathBuf::from(DEFAULT_DB_PATH));
        assert!(config.resolve_rules_dir(None).is_none());
    }

    #[test]
    fn sections_are_read_and_flags_override() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [ocr]
            min_page_text_chars = 40

            [amounts]
            unsigned_text_default = "credit"

            [export]
            layout = "four-column"
            date_order = "day-first"

            [paths]
            db_path = "jobs/state.db"
            "#,
        )
        .expect("parse config");
        assert_eq!(config.ocr.min_page_text_chars, 40);
        assert_eq!(config.ocr.pdftoppm_cmd, "pdftoppm");
        assert_eq!(
            config.resolve_amount_policy().expect("policy").unsigned_text_default,
            TransactionKind::Credit
        );
        assert_eq!(config.resolve_layout(None).expect("layout"), CsvLayout::FourColumn);
        assert_eq!(
            config.resolve_layout(Some("three-column")).expect("layout"),
            CsvLayout::ThreeColumn
        );
        assert_eq!(config.resolve_date_order(None).expect("order"), DateOrder::DayFirst);
        assert_eq!(
            config.resolve_db_path(Some(Path::new("other.db"))),
            PathBuf::from("other.db")
        );
        assert_eq!(config.resolve_db_path(None), PathBuf::from("jobs/state.db"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_kind = PipelineConfig::from_toml_str("[amounts]\nunsigned_text_default = \"maybe\"\n");
        assert!(matches!(bad_kind, Err(ConfigError::Invalid(_))));
        let bad_layout = PipelineConfig::from_toml_str("[export]\nlayout = \"wide\"\n");
        assert!(matches!(bad_layout, Err(ConfigError::Invalid(_))));
        let bad_toml = PipelineConfig::from_toml_str("[ocr\n");
        assert!(matches!(bad_toml, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let path = std::env::temp_dir().join(format!("stmt_cfg_{}.toml", Uuid::new_v4()));
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(ConfigError::Read { .. })
        ));
    }
}
