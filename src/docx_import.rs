use crate::model::{RawRecord, RecordPosition, SourceKind};
use regex::Regex;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;
use zip::ZipArchive;

const DOCUMENT_PART: &str = "word/document.xml";

/// Top-level blocks in reading order: a whole table row, a self-closing empty
/// paragraph or a paragraph with content.
fn block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<w:tr(?:\s[^>]*)?>.*?</w:tr>|<w:p(?:\s[^>]*)?/>|<w:p(?:\s[^>]*)?>.*?</w:p>")
            .expect("docx block regex")
    })
}

fn cell_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<w:tc(?:\s[^>]*)?>.*?</w:tc>").expect("docx cell regex"))
}

/// Text runs plus the tab and break elements that separate them.
fn run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|<w:(tab|br|cr)(?:\s[^>]*)?/>")
            .expect("docx run regex")
    })
}

fn entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"&(?:#[xX]([0-9A-Fa-f]+)|#([0-9]+)|(lt|gt|quot|apos|amp));")
            .expect("xml entity regex")
    })
}

/// Decodes named and numeric character references in one pass. References that
/// name no valid character are left as written.
fn unescape_xml(raw: &str) -> String {
    entity_re()
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            let code = match (caps.get(1), caps.get(2), caps.get(3)) {
                (Some(hex), _, _) => u32::from_str_radix(hex.as_str(), 16).ok(),
                (_, Some(dec), _) => dec.as_str().parse::<u32>().ok(),
                (_, _, Some(name)) => match name.as_str() {
                    "lt" => Some('<' as u32),
                    "gt" => Some('>' as u32),
                    "quot" => Some('"' as u32),
                    "apos" => Some('\'' as u32),
                    _ => Some('&' as u32),
                },
                _ => None,
            };
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn fragment_text(xml: &str) -> String {
    let mut out = String::new();
    for caps in run_re().captures_iter(xml) {
        match (caps.get(1), caps.get(2)) {
            (Some(text), _) => out.push_str(&unescape_xml(text.as_str())),
            (None, Some(_)) => out.push(' '),
            (None, None) => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn block_text(block: &str) -> String {
    if block.starts_with("<w:tr") {
        cell_re()
            .find_iter(block)
            .map(|cell| fragment_text(cell.as_str()))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        fragment_text(block)
    }
}

/// Paragraph texts in document order; empty paragraphs keep their slot.
pub fn paragraphs_from_document_xml(xml: &str) -> Vec<String> {
    block_re()
        .find_iter(xml)
        .map(|m| block_text(m.as_str()))
        .collect()
}

fn read_document_xml(path: &Path) -> Result<String, String> {
    let file = File::open(path).map_err(|e| format!("failed to open {}: {e}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| format!("not a word-processor archive: {e}"))?;
    let mut part = archive
        .by_name(DOCUMENT_PART)
        .map_err(|e| format!("missing {DOCUMENT_PART}: {e}"))?;
    let mut xml = String::new();
    part.read_to_string(&mut xml)
        .map_err(|e| format!("failed to read {DOCUMENT_PART}: {e}"))?;
    Ok(xml)
}

/// One record per non-empty paragraph or table row. `line_index` is the block's
/// ordinal in the document, counting empty paragraphs.
pub fn read_docx(path: &Path, source_name: &str) -> Result<Vec<RawRecord>, String> {
    let xml = read_document_xml(path)?;
    Ok(paragraphs_from_document_xml(&xml)
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.is_empty())
        .map(|(idx, text)| {
            RawRecord::new(
                text,
                source_name,
                SourceKind::ParagraphDocument,
                RecordPosition::Line(idx + 1),
            )
        })
        .collect())
}
