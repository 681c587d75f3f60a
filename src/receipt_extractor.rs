use crate::amount_normalizer::parse_magnitude;
use crate::date_normalizer::{self, date_spans};
use crate::description_normalizer::{categorize_with, UNCATEGORIZED};
use crate::model::RawRecord;
use crate::rules_store::{default_rules, RuleSet};
use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::debug;

pub const UNKNOWN_VENDOR: &str = "Unknown Vendor";
const VENDOR_SCAN_LINES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub item: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub total_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptData {
    pub vendor_name: String,
    pub transaction_date: NaiveDate,
    pub total_amount: f64,
    pub currency: String,
    pub line_items: Vec<LineItem>,
    pub category_suggestion: String,
    pub source_name: String,
    pub ocr_raw_text: String,
}

fn numeric_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4}").expect("receipt date regex"))
}

fn numeric_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\d\-.()\s]+$").expect("numeric line regex"))
}

fn vendor_patterns() -> &'static [Regex; 2] {
    static RE: OnceLock<[Regex; 2]> = OnceLock::new();
    RE.get_or_init(|| {
        [
            Regex::new(r"(?i)(?:store|merchant|vendor)[:\s]+([^\n]+)").expect("vendor regex"),
            Regex::new(r"(?i)(?:welcome to|thank you for shopping at)[:\s]+([^\n]+)")
                .expect("vendor greeting regex"),
        ]
    })
}

fn labeled_date_patterns() -> &'static [Regex; 2] {
    static RE: OnceLock<[Regex; 2]> = OnceLock::new();
    RE.get_or_init(|| {
        [
            Regex::new(r"(?i)(?:date|time)[:\s]+([^\n]+)").expect("labeled date regex"),
            Regex::new(r"(?i)(?:receipt|invoice|transaction)[:\s]+([^\n]+)")
                .expect("labeled receipt regex"),
        ]
    })
}

/// Checked in order; the OCR misspellings come last.
fn total_patterns() -> &'static [Regex; 3] {
    static RE: OnceLock<[Regex; 3]> = OnceLock::new();
    RE.get_or_init(|| {
        [
            Regex::new(r"(?i)\b(?:grand\s+)?total\b[:\s]+[$£€]?\s*([0-9][0-9,]*\.[0-9]{2})")
                .expect("total regex"),
            Regex::new(r"(?i)\b(?:amount|sum|payment)\b[:\s]+[$£€]?\s*([0-9][0-9,]*\.[0-9]{2})")
                .expect("amount regex"),
            Regex::new(r"(?i)\b(?:totai|totol|t0tal|tota1)\b[:\s]+[$£€]?\s*([0-9][0-9,]*\.[0-9]{2})")
                .expect("misspelled total regex"),
        ]
    })
}

fn any_amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[$£€]?([0-9][0-9,]*\.[0-9]{2})").expect("any amount regex"))
}

fn items_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:item|description|qty|quantity|price|amount)").expect("items start regex")
    })
}

fn items_end_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:subtotal|tax|total|balance|payment)").expect("items end regex")
    })
}

fn qty_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(.*?)\s+(\d+(?:\.\d+)?)\s*[xX]\s*[$£€]?(\d+(?:\.\d+)?)\s*[$£€]?(\d+(?:\.\d+)?)",
        )
        .expect("qty item regex")
    })
}

fn priced_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.*?)\s+[$£€]?(\d+(?:\.\d+)?)\s*$").expect("priced item regex")
    })
}

fn currency_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(USD|GBP|EUR|JPY|CHF|CAD|AUD)\b").expect("currency code regex")
    })
}

fn extract_vendor(text: &str) -> String {
    for line in text.lines().take(VENDOR_SCAN_LINES) {
        let line = line.trim();
        if line.is_empty() || numeric_date_re().is_match(line) || numeric_line_re().is_match(line) {
            continue;
        }
        return line.to_string();
    }
    vendor_patterns()
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| UNKNOWN_VENDOR.to_string())
}

fn extract_date(text: &str) -> Option<NaiveDate> {
    let from_spans = date_spans(text)
        .into_iter()
        .find_map(|span| date_normalizer::normalize(Some(&text[span])).ok());
    if from_spans.is_some() {
        return from_spans;
    }
    labeled_date_patterns().iter().find_map(|re| {
        let caps = re.captures(text)?;
        date_normalizer::normalize(Some(caps.get(1)?.as_str())).ok()
    })
}

fn positive_amount(raw: &str) -> Option<f64> {
    parse_magnitude(raw).ok().filter(|v| *v > 0.0)
}

fn extract_total(text: &str) -> Option<f64> {
    for re in total_patterns() {
        if let Some(amount) = re
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| positive_amount(m.as_str()))
        {
            return Some(amount);
        }
    }

    // The total usually sits among the last amounts printed.
    let amounts = any_amount_re()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect::<Vec<_>>();
    let tail = (amounts.len() / 4).max(1);
    amounts
        .iter()
        .skip(amounts.len().saturating_sub(tail))
        .find_map(|raw| positive_amount(raw))
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok()
}

fn extract_line_items(text: &str) -> Vec<LineItem> {
    let mut items = Vec::new();
    let mut in_items_section = false;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if in_items_section && items_end_re().is_match(line) {
            in_items_section = false;
            continue;
        }
        // Only digit-free lines can be column headers.
        if !in_items_section
            && items_start_re().is_match(line)
            && !line.chars().any(|c| c.is_ascii_digit())
        {
            in_items_section = true;
            continue;
        }

        if let Some(caps) = qty_item_re().captures(line) {
            let parsed = (
                parse_number(&caps[2]),
                parse_number(&caps[3]),
                parse_number(&caps[4]),
            );
            let name = caps[1].trim();
            if let (Some(quantity), Some(unit_price), Some(total_price)) = parsed {
                if !name.is_empty() {
                    items.push(LineItem {
                        item: name.to_string(),
                        quantity,
                        unit_price,
                        total_price,
                    });
                    continue;
                }
            }
        }

        if in_items_section {
            if let Some(caps) = priced_item_re().captures(line) {
                let name = caps[1].trim();
                if let (false, Some(price)) = (name.is_empty(), parse_number(&caps[2])) {
                    items.push(LineItem {
                        item: name.to_string(),
                        quantity: 1.0,
                        unit_price: price,
                        total_price: price,
                    });
                }
            }
        }
    }
    items
}

fn extract_currency(text: &str) -> String {
    for (symbol, code) in [('$', "USD"), ('£', "GBP"), ('€', "EUR"), ('¥', "JPY")] {
        if text.contains(symbol) {
            return code.to_string();
        }
    }
    currency_code_re()
        .captures(text)
        .map(|caps| caps[1].to_string())
        .unwrap_or_else(|| "USD".to_string())
}

fn suggest_category(vendor: &str, items: &[LineItem], rules: &RuleSet) -> String {
    let by_vendor = categorize_with(vendor, rules);
    if by_vendor != UNCATEGORIZED || items.is_empty() {
        return by_vendor;
    }
    let joined = items
        .iter()
        .map(|i| i.item.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    categorize_with(&joined, rules)
}

pub fn extract_receipt(record: &RawRecord) -> Option<ReceiptData> {
    extract_receipt_with(record, default_rules())
}

/// Reads receipt fields out of OCR text. A receipt without a recognisable date or a
/// positive total is not reported; no date is ever invented.
pub fn extract_receipt_with(record: &RawRecord, rules: &RuleSet) -> Option<ReceiptData> {
    let text = record.text();
    let vendor_name = extract_vendor(text);
    let Some(transaction_date) = extract_date(text) else {
        debug!(record = %record.locator(), "receipt has no date");
        return None;
    };
    let Some(total_amount) = extract_total(text) else {
        debug!(record = %record.locator(), "receipt has no total");
        return None;
    };
    let line_items = extract_line_items(text);
    let category_suggestion = suggest_category(&vendor_name, &line_items, rules);

    Some(ReceiptData {
        vendor_name,
        transaction_date,
        total_amount,
        currency: extract_currency(text),
        line_items,
        category_suggestion,
        source_name: record.source_name().to_string(),
        ocr_raw_text: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RecordPosition, SourceKind};

    fn receipt(text: &str) -> RawRecord {
        RawRecord::new(text, "receipt.png", SourceKind::Image, RecordPosition::Whole)
    }

    const GROCERY: &str = "KROGER #123\n555-123-4567\n07/31/2025 14:02\nItem Qty Price\nBananas 2 x 0.50 1.00\nMilk 3.49\nBread $2.25\nSubtotal 6.74\nTax 0.54\nTOTAL $7.28\nThank you";

    #[test]
    fn grocery_receipt_is_fully_read() {
        let data = extract_receipt(&receipt(GROCERY)).expect("receipt");
        assert_eq!(data.vendor_name, "KROGER #123");
        assert_eq!(
            data.transaction_date,
            NaiveDate::from_ymd_opt(2025, 7, 31).expect("date")
        );
        assert_eq!(data.total_amount, 7.28);
        assert_eq!(data.currency, "USD");
        assert_eq!(data.category_suggestion, "Groceries");
        assert_eq!(
            data.line_items,
            vec![
                LineItem {
                    item: "Bananas".to_string(),
                    quantity: 2.0,
                    unit_price: 0.5,
                    total_price: 1.0
                },
                LineItem {
                    item: "Milk".to_string(),
                    quantity: 1.0,
                    unit_price: 3.49,
                    total_price: 3.49
                },
                LineItem {
                    item: "Bread".to_string(),
                    quantity: 1.0,
                    unit_price: 2.25,
                    total_price: 2.25
                },
            ]
        );
    }

    #[test]
    fn ocr_misspelled_total_is_found() {
        let text = "Corner Cafe\n01/02/2025\nLatte 4.00\nT0TAL: 4.00";
        let data = extract_receipt(&receipt(text)).expect("receipt");
        assert_eq!(data.total_amount, 4.0);
        assert_eq!(data.category_suggestion, "Dining");
    }

    #[test]
    fn last_amounts_are_the_fallback_total() {
        let text = "Shop\n2025-03-04\nA 1.00\nB 2.00\nC 3.00\nD 9.50";
        assert_eq!(extract_total(text), Some(9.5));
        assert_eq!(extract_date(text), NaiveDate::from_ymd_opt(2025, 3, 4));
    }

    #[test]
    fn vendor_skips_numeric_lines_and_falls_back() {
        assert_eq!(extract_vendor("\n(555) 010-0000\nACME HARDWARE"), "ACME HARDWARE");
        assert_eq!(
            extract_vendor("1\n2\n3\n4\n5\nStore: Bolt Books"),
            "Bolt Books"
        );
        assert_eq!(extract_vendor("1\n2"), UNKNOWN_VENDOR);
    }

    #[test]
    fn currency_symbols_and_codes() {
        assert_eq!(extract_currency("Total £5.00"), "GBP");
        assert_eq!(extract_currency("Total 5.00 CHF"), "CHF");
        assert_eq!(extract_currency("Total 5.00"), "USD");
    }

    #[test]
    fn receipts_without_date_or_total_are_dropped() {
        assert_eq!(extract_receipt(&receipt("Shop\nTotal 5.00")), None);
        assert_eq!(extract_receipt(&receipt("Shop\n01/02/2025\nthanks")), None);
    }
}
