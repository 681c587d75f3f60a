use crate::docx_import::read_docx;
use crate::image_import::read_image;
use crate::model::{RawRecord, SourceKind};
use crate::ocr::{NoOcr, OcrEngine, PageRasterizer, PdftoppmRasterizer, TesseractOcr};
use crate::pdf_import::{read_pdf, DEFAULT_MIN_PAGE_TEXT_CHARS};
use crate::tabular_import::read_tabular;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Collaborators shared by the adapters of one run.
#[derive(Clone)]
pub struct ExtractContext {
    pub ocr: Arc<dyn OcrEngine>,
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub min_page_text_chars: usize,
}

impl fmt::Debug for ExtractContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractContext")
            .field("min_page_text_chars", &self.min_page_text_chars)
            .finish_non_exhaustive()
    }
}

impl ExtractContext {
    pub fn new(
        ocr: Arc<dyn OcrEngine>,
        rasterizer: Arc<dyn PageRasterizer>,
        min_page_text_chars: usize,
    ) -> Self {
        Self {
            ocr,
            rasterizer,
            min_page_text_chars,
        }
    }

    pub fn without_ocr() -> Self {
        Self::new(
            Arc::new(NoOcr),
            Arc::new(NoOcr),
            DEFAULT_MIN_PAGE_TEXT_CHARS,
        )
    }
}

impl Default for ExtractContext {
    fn default() -> Self {
        Self::new(
            Arc::new(TesseractOcr::default()),
            Arc::new(PdftoppmRasterizer::default()),
            DEFAULT_MIN_PAGE_TEXT_CHARS,
        )
    }
}

pub fn source_name_of(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Source kind implied by the file extension.
pub fn sniff_kind(path: &Path) -> Option<SourceKind> {
    path.extension()
        .and_then(|s| s.to_str())
        .and_then(SourceKind::from_extension)
}

/// Reads `path` as `kind`. Never fails: unreadable input yields an empty sequence and
/// a warning.
pub fn extract(path: &Path, kind: SourceKind, ctx: &ExtractContext) -> Vec<RawRecord> {
    let source_name = source_name_of(path);
    let result = match kind {
        SourceKind::Tabular => read_tabular(path, &source_name),
        SourceKind::PaginatedDocument => read_pdf(
            path,
            &source_name,
            ctx.rasterizer.as_ref(),
            ctx.ocr.as_ref(),
            ctx.min_page_text_chars,
        ),
        SourceKind::ParagraphDocument => read_docx(path, &source_name),
        SourceKind::Image => read_image(path, &source_name, ctx.ocr.as_ref()),
    };

    match result {
        Ok(records) => {
            info!(
                file = %source_name,
                kind = kind.as_str(),
                records = records.len(),
                "extracted records"
            );
            records
        }
        Err(e) => {
            warn!(file = %source_name, kind = kind.as_str(), "extraction failed: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use uuid::Uuid;

    #[test]
    fn kind_is_sniffed_from_extension() {
        assert_eq!(sniff_kind(Path::new("a/b.CSV")), Some(SourceKind::Tabular));
        assert_eq!(
            sniff_kind(Path::new("scan.pdf")),
            Some(SourceKind::PaginatedDocument)
        );
        assert_eq!(sniff_kind(Path::new("notes")), None);
        assert_eq!(source_name_of(Path::new("/tmp/x/bank.csv")), "bank.csv");
    }

    #[test]
    fn unreadable_sources_degrade_to_empty() {
        let ctx = ExtractContext::without_ocr();
        let missing = std::env::temp_dir().join(format!("stmt_missing_{}.csv", Uuid::new_v4()));
        assert!(extract(&missing, SourceKind::Tabular, &ctx).is_empty());
        assert!(extract(&missing, SourceKind::ParagraphDocument, &ctx).is_empty());
        assert!(extract(&missing, SourceKind::Image, &ctx).is_empty());
    }

    #[test]
    fn tabular_file_round_trips_through_dispatch() {
        let ctx = ExtractContext::without_ocr();
        let path = std::env::temp_dir().join(format!("stmt_adapter_{}.csv", Uuid::new_v4()));
        fs::write(&path, "Date,Description,Amount\n07/31/2025,Test,1.00\n").expect("write csv");
        let records = extract(&path, SourceKind::Tabular, &ctx);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_kind(), SourceKind::Tabular);
        let _ = fs::remove_file(path);
    }
}
