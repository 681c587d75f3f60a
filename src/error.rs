use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DateError {
    #[error("no date candidate")]
    Missing,

    #[error("unrecognised date: {0}")]
    Unrecognised(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("no amount candidate")]
    Missing,

    #[error("amount is not a number: {0}")]
    NotANumber(String),

    #[error("amount is zero: {0}")]
    Zero(String),
}

/// Why the assembler refused to emit a transaction for one record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("date rejected: {0}")]
    Date(#[from] DateError),

    #[error("amount rejected: {0}")]
    Amount(#[from] AmountError),
}

impl Rejection {
    /// Stable key for grouping rejections in reports.
    pub fn reason_key(&self) -> &'static str {
        match self {
            Self::Date(DateError::Missing) => "date_missing",
            Self::Date(DateError::Unrecognised(_)) => "date_unrecognised",
            Self::Amount(AmountError::Missing) => "amount_missing",
            Self::Amount(AmountError::NotANumber(_)) => "amount_not_a_number",
            Self::Amount(AmountError::Zero(_)) => "amount_zero",
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}
