use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fmt;

/// Which kind of document a [`RawRecord`] was recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Tabular,
    PaginatedDocument,
    ParagraphDocument,
    Image,
}

impl SourceKind {
    /// Maps a file extension onto a source kind. `None` for unsupported files.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "csv" | "tsv" | "txt" | "xlsx" | "xls" => Some(Self::Tabular),
            "pdf" => Some(Self::PaginatedDocument),
            "docx" => Some(Self::ParagraphDocument),
            "jpg" | "jpeg" | "png" | "tif" | "tiff" => Some(Self::Image),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tabular => "tabular",
            Self::PaginatedDocument => "paginated_document",
            Self::ParagraphDocument => "paragraph_document",
            Self::Image => "image",
        }
    }
}

/// Position of a record inside its source. Pages and lines never coexist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "unit", content = "index", rename_all = "snake_case")]
pub enum RecordPosition {
    Page(usize),
    Line(usize),
    Whole,
}

/// One indivisible unit of recovered text. Only the source adapters build these.
#[derive(Debug, Clone, Serialize)]
pub struct RawRecord {
    text: String,
    source_name: String,
    source_kind: SourceKind,
    position: RecordPosition,
    extracted_at: DateTime<Utc>,
}

impl RawRecord {
    pub(crate) fn new(
        text: impl Into<String>,
        source_name: impl Into<String>,
        source_kind: SourceKind,
        position: RecordPosition,
    ) -> Self {
        Self {
            text: text.into(),
            source_name: source_name.into(),
            source_kind,
            position,
            extracted_at: Utc::now(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub fn position(&self) -> RecordPosition {
        self.position
    }

    pub fn page_index(&self) -> Option<usize> {
        match self.position {
            RecordPosition::Page(n) => Some(n),
            _ => None,
        }
    }

    pub fn line_index(&self) -> Option<usize> {
        match self.position {
            RecordPosition::Line(n) => Some(n),
            _ => None,
        }
    }

    pub fn extracted_at(&self) -> DateTime<Utc> {
        self.extracted_at
    }

    /// Short human label used in logs and rejection reports.
    pub fn locator(&self) -> String {
        match self.position {
            RecordPosition::Page(n) => format!("{} page {n}", self.source_name),
            RecordPosition::Line(n) => format!("{} line {n}", self.source_name),
            RecordPosition::Whole => self.source_name.clone(),
        }
    }
}

#[cfg(test)]
impl RawRecord {
    pub(crate) fn for_test(text: &str, kind: SourceKind) -> Self {
        Self::new(text, "test.csv", kind, RecordPosition::Line(1))
    }
}

/// The fixed set of fields the miner looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateField {
    Date,
    Description,
    Amount,
    Credit,
    Debit,
}

impl CandidateField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Description => "description",
            Self::Amount => "amount",
            Self::Credit => "credit",
            Self::Debit => "debit",
        }
    }
}

/// A combined amount candidate. Structured literals come from labeled columns and are
/// never locale-ambiguous; free text still needs the sign heuristics, so it carries
/// the record text the amount was found in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum AmountCandidate {
    Structured { raw: String },
    FreeText { raw: String, context: String },
}

impl AmountCandidate {
    pub fn structured(raw: impl Into<String>) -> Self {
        Self::Structured { raw: raw.into() }
    }

    pub fn free_text(raw: impl Into<String>, context: impl Into<String>) -> Self {
        Self::FreeText {
            raw: raw.into(),
            context: context.into(),
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            Self::Structured { raw } | Self::FreeText { raw, .. } => raw,
        }
    }

    /// Text scanned for credit and debit keywords.
    pub fn sign_context(&self) -> &str {
        match self {
            Self::Structured { raw } => raw,
            Self::FreeText { context, .. } => context,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured { .. })
    }
}

/// Everything the miner found in one record, before any interpretation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldCandidates {
    pub(crate) date: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) amount: Option<AmountCandidate>,
    pub(crate) credit: Option<String>,
    pub(crate) debit: Option<String>,
    pub(crate) confidence: BTreeMap<CandidateField, f64>,
    pub(crate) errors: Vec<String>,
}

impl FieldCandidates {
    pub fn date(&self) -> Option<&str> {
        self.date.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn amount(&self) -> Option<&AmountCandidate> {
        self.amount.as_ref()
    }

    pub fn credit(&self) -> Option<&str> {
        self.credit.as_deref()
    }

    pub fn debit(&self) -> Option<&str> {
        self.debit.as_deref()
    }

    pub fn confidence(&self, field: CandidateField) -> f64 {
        self.confidence.get(&field).copied().unwrap_or(0.0)
    }

    pub fn confidence_map(&self) -> &BTreeMap<CandidateField, f64> {
        &self.confidence
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransactionKind {
    Credit,
    Debit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "Credit",
            Self::Debit => "Debit",
        }
    }

    /// Applies this kind's sign to a magnitude.
    pub fn signed(&self, value: f64) -> f64 {
        match self {
            Self::Credit => value.abs(),
            Self::Debit => -value.abs(),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal artifact of the pipeline. The amount sign always agrees with `kind`:
/// the constructor applies the sign itself rather than trusting the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalTransaction {
    id: String,
    date: NaiveDate,
    description: String,
    amount: f64,
    kind: TransactionKind,
    source_name: String,
    notes: Vec<String>,
}

impl CanonicalTransaction {
    pub fn new(
        date: NaiveDate,
        description: impl Into<String>,
        amount: f64,
        kind: TransactionKind,
        source_name: impl Into<String>,
        notes: Vec<String>,
    ) -> Self {
        let description = description.into();
        let source_name = source_name.into();
        let amount = kind.signed(amount);
        let id = transaction_id(&source_name, date, &description, amount, &notes);
        Self {
            id,
            date,
            description,
            amount,
            kind,
            source_name,
            notes,
        }
    }

    /// Rebuilds a stored transaction; the sign is re-applied from `kind`.
    pub(crate) fn restore(
        id: String,
        date: NaiveDate,
        description: String,
        amount: f64,
        kind: TransactionKind,
        source_name: String,
        notes: Vec<String>,
    ) -> Self {
        Self {
            id,
            date,
            description,
            amount: kind.signed(amount),
            kind,
            source_name,
            notes,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }
}

fn transaction_id(
    source_name: &str,
    date: NaiveDate,
    description: &str,
    amount: f64,
    notes: &[String],
) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source_name.as_bytes());
    hasher.update(b"|");
    hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(description.as_bytes());
    hasher.update(b"|");
    hasher.update(format!("{amount:.4}").as_bytes());
    for note in notes {
        hasher.update(b"|");
        hasher.update(note.as_bytes());
    }
    let hex = format!("{:x}", hasher.finalize());
    format!("txn_{}", &hex[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn constructor_forces_sign_to_match_kind() {
        let credit = CanonicalTransaction::new(
            day(2025, 7, 31),
            "Refund",
            -12.5,
            TransactionKind::Credit,
            "a.csv",
            vec![],
        );
        let debit = CanonicalTransaction::new(
            day(2025, 7, 31),
            "Coffee",
            4.25,
            TransactionKind::Debit,
            "a.csv",
            vec![],
        );
        assert_eq!(credit.amount(), 12.5);
        assert_eq!(debit.amount(), -4.25);
    }

    #[test]
    fn transaction_id_is_stable_for_same_content() {
        let make = |note: &str| {
            CanonicalTransaction::new(
                day(2025, 1, 2),
                "Coffee",
                4.0,
                TransactionKind::Debit,
                "a.csv",
                vec![note.to_string()],
            )
        };
        assert_eq!(make("x").id(), make("x").id());
        assert_ne!(make("x").id(), make("y").id());
        assert!(make("x").id().starts_with("txn_"));
    }

    #[test]
    fn extension_mapping_covers_supported_formats() {
        assert_eq!(SourceKind::from_extension("CSV"), Some(SourceKind::Tabular));
        assert_eq!(SourceKind::from_extension(".xlsx"), Some(SourceKind::Tabular));
        assert_eq!(
            SourceKind::from_extension("pdf"),
            Some(SourceKind::PaginatedDocument)
        );
        assert_eq!(
            SourceKind::from_extension("docx"),
            Some(SourceKind::ParagraphDocument)
        );
        assert_eq!(SourceKind::from_extension("jpeg"), Some(SourceKind::Image));
        assert_eq!(SourceKind::from_extension("exe"), None);
    }

    #[test]
    fn record_position_exposes_only_one_index() {
        let rec = RawRecord::new("x", "s.pdf", SourceKind::PaginatedDocument, RecordPosition::Page(3));
        assert_eq!(rec.page_index(), Some(3));
        assert_eq!(rec.line_index(), None);
        assert_eq!(rec.locator(), "s.pdf page 3");
    }
}
