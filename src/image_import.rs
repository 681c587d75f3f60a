use crate::model::{RawRecord, RecordPosition, SourceKind};
use crate::ocr::OcrEngine;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Sends the whole image to OCR. Zero or one record.
pub fn read_image(path: &Path, source_name: &str, ocr: &dyn OcrEngine) -> Result<Vec<RawRecord>, String> {
    let bytes = fs::read(path).map_err(|e| format!("failed to read image {}: {e}", path.display()))?;
    match ocr.recognize(&bytes) {
        Some(text) => Ok(vec![RawRecord::new(
            text,
            source_name,
            SourceKind::Image,
            RecordPosition::Whole,
        )]),
        None => {
            warn!(file = source_name, "ocr produced no text for image");
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::NoOcr;
    use uuid::Uuid;

    struct EchoOcr;

    impl OcrEngine for EchoOcr {
        fn recognize(&self, image: &[u8]) -> Option<String> {
            Some(String::from_utf8_lossy(image).to_string())
        }
    }

    #[test]
    fn image_yields_one_whole_record_or_none() {
        let path = std::env::temp_dir().join(format!("stmt_img_{}.png", Uuid::new_v4()));
        fs::write(&path, b"TOTAL 12.00").expect("write image");

        let records = read_image(&path, "r.png", &EchoOcr).expect("read image");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text(), "TOTAL 12.00");
        assert_eq!(records[0].position(), RecordPosition::Whole);
        assert_eq!(records[0].page_index(), None);

        assert!(read_image(&path, "r.png", &NoOcr).expect("read image").is_empty());
        let _ = fs::remove_file(path);
    }
}
