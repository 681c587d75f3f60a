use crate::model::{RawRecord, RecordPosition, SourceKind};
use crate::ocr::{OcrEngine, PageRasterizer};
use pdf_extract::extract_text_by_pages;
use std::path::Path;
use tracing::{debug, warn};

pub const DEFAULT_MIN_PAGE_TEXT_CHARS: usize = 100;
/// Upper bound when pages have to be discovered by rasterizing blindly.
const MAX_PROBED_PAGES: usize = 500;

pub fn ocr_failed_marker(page: usize) -> String {
    format!("[OCR FAILED] No text could be extracted from page {page}")
}

fn ocr_page(
    path: &Path,
    page: usize,
    rasterizer: &dyn PageRasterizer,
    ocr: &dyn OcrEngine,
) -> Option<String> {
    let image = rasterizer.rasterize(path, page)?;
    ocr.recognize(&image)
}

/// One record per page. Pages with too little embedded text go through OCR and
/// fall back to a marker record when OCR yields nothing.
pub fn records_from_pages(
    pages: Vec<String>,
    path: &Path,
    source_name: &str,
    rasterizer: &dyn PageRasterizer,
    ocr: &dyn OcrEngine,
    min_page_text_chars: usize,
) -> Vec<RawRecord> {
    pages
        .into_iter()
        .enumerate()
        .map(|(idx, embedded)| {
            let page = idx + 1;
            let text = if embedded.trim().chars().count() < min_page_text_chars {
                debug!(file = source_name, page, "page text too short, trying ocr");
                ocr_page(path, page, rasterizer, ocr).unwrap_or_else(|| {
                    warn!(file = source_name, page, "ocr produced no text");
                    ocr_failed_marker(page)
                })
            } else {
                embedded
            };
            RawRecord::new(
                text,
                source_name,
                SourceKind::PaginatedDocument,
                RecordPosition::Page(page),
            )
        })
        .collect()
}

/// Used when the text layer cannot be read at all: rasterize page after page until
/// the rasterizer runs out.
fn records_from_probing(
    path: &Path,
    source_name: &str,
    rasterizer: &dyn PageRasterizer,
    ocr: &dyn OcrEngine,
) -> Vec<RawRecord> {
    let mut records = Vec::new();
    for page in 1..=MAX_PROBED_PAGES {
        let Some(image) = rasterizer.rasterize(path, page) else {
            break;
        };
        let text = ocr.recognize(&image).unwrap_or_else(|| ocr_failed_marker(page));
        records.push(RawRecord::new(
            text,
            source_name,
            SourceKind::PaginatedDocument,
            RecordPosition::Page(page),
        ));
    }
    records
}

pub fn read_pdf(
    path: &Path,
    source_name: &str,
    rasterizer: &dyn PageRasterizer,
    ocr: &dyn OcrEngine,
    min_page_text_chars: usize,
) -> Result<Vec<RawRecord>, String> {
    if !path.is_file() {
        return Err(format!("pdf not found: {}", path.display()));
    }
    match extract_text_by_pages(path) {
        Ok(pages) if !pages.is_empty() => Ok(records_from_pages(
            pages,
            path,
            source_name,
            rasterizer,
            ocr,
            min_page_text_chars,
        )),
        Ok(_) => {
            warn!(file = source_name, "pdf text layer has no pages");
            Ok(records_from_probing(path, source_name, rasterizer, ocr))
        }
        Err(e) => {
            warn!(file = source_name, "failed to read pdf text layer: {e}");
            Ok(records_from_probing(path, source_name, rasterizer, ocr))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::NoOcr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeRasterizer {
        pages: usize,
        calls: AtomicUsize,
    }

    impl PageRasterizer for FakeRasterizer {
        fn rasterize(&self, _path: &Path, page: usize) -> Option<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (page <= self.pages).then(|| format!("page-{page}").into_bytes())
        }
    }

    struct FakeOcr;

    impl OcrEngine for FakeOcr {
        fn recognize(&self, image: &[u8]) -> Option<String> {
            let name = String::from_utf8_lossy(image).to_string();
            (name != "page-2").then(|| format!("ocr text for {name}"))
        }
    }

    /// A minimal PDF with one Helvetica text line per page.
    fn pdf_with_pages(lines: &[&str]) -> Vec<u8> {
        let mut objects = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            format!(
                "<< /Type /Pages /Kids [{}] /Count {} >>",
                (0..lines.len())
                    .map(|i| format!("{} 0 R", 4 + 2 * i))
                    .collect::<Vec<_>>()
                    .join(" "),
                lines.len()
            ),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
                .to_string(),
        ];
        for (i, line) in lines.iter().enumerate() {
            let content = format!("BT /F1 12 Tf 72 720 Td ({line}) Tj ET");
            objects.push(format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
                 /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
                5 + 2 * i
            ));
            objects.push(format!(
                "<< /Length {} >>\nstream\n{content}\nendstream",
                content.len()
            ));
        }

        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::with_capacity(objects.len());
        for (idx, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", idx + 1).as_bytes());
        }
        let xref_at = out.len();
        out.extend_from_slice(
            format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes(),
        );
        for offset in offsets {
            out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
                objects.len() + 1
            )
            .as_bytes(),
        );
        out
    }

    fn long_text() -> String {
        "07/31/2025 Grocery purchase 45.10 ".repeat(5)
    }

    #[test]
    fn short_pages_are_sent_to_ocr() {
        let raster = FakeRasterizer {
            pages: 3,
            calls: AtomicUsize::new(0),
        };
        let pages = vec![long_text(), "x".to_string(), String::new()];
        let records = records_from_pages(
            pages,
            Path::new("s.pdf"),
            "s.pdf",
            &raster,
            &FakeOcr,
            DEFAULT_MIN_PAGE_TEXT_CHARS,
        );
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].text(), long_text());
        assert_eq!(records[1].text(), ocr_failed_marker(2));
        assert_eq!(records[2].text(), "ocr text for page-3");
        assert_eq!(records[2].page_index(), Some(3));
        assert_eq!(raster.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn marker_names_the_page() {
        let records = records_from_pages(
            vec![String::new()],
            Path::new("s.pdf"),
            "s.pdf",
            &NoOcr,
            &NoOcr,
            DEFAULT_MIN_PAGE_TEXT_CHARS,
        );
        assert_eq!(
            records[0].text(),
            "[OCR FAILED] No text could be extracted from page 1"
        );
    }

    #[test]
    fn probing_stops_when_rasterizer_runs_out() {
        let raster = FakeRasterizer {
            pages: 2,
            calls: AtomicUsize::new(0),
        };
        let records = records_from_probing(Path::new("s.pdf"), "s.pdf", &raster, &FakeOcr);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].text(), ocr_failed_marker(2));
        assert_eq!(raster.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn each_pdf_page_becomes_its_own_record() {
        let path = std::env::temp_dir().join(format!(
            "stmt_pdf_pages_{}_{}.pdf",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        std::fs::write(
            &path,
            pdf_with_pages(&[
                "07/31/2025 Grocery purchase 45.10 USD",
                "08/01/2025 Hardware store 88.20 USD",
            ]),
        )
        .expect("write pdf");

        let records = read_pdf(&path, "two_pages.pdf", &NoOcr, &NoOcr, 10).expect("read pdf");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].page_index(), Some(1));
        assert_eq!(records[1].page_index(), Some(2));
        assert!(records[0].text().contains("Grocery purchase"));
        assert!(!records[0].text().contains("Hardware"));
        assert!(records[1].text().contains("Hardware store"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_pdf_is_an_error() {
        assert!(read_pdf(Path::new("/nonexistent/x.pdf"), "x.pdf", &NoOcr, &NoOcr, 100).is_err());
    }
}
