use crate::date_normalizer::date_spans;
use crate::model::{AmountCandidate, CandidateField, FieldCandidates, RawRecord};
use regex::Regex;
use serde_json::{Map, Value};
use std::ops::Range;
use std::sync::OnceLock;

const STRUCTURED_CONFIDENCE: f64 = 0.95;
const TEXT_DATE_CONFIDENCE: f64 = 0.8;
const TEXT_SPLIT_AMOUNT_CONFIDENCE: f64 = 0.9;
const TEXT_AMOUNT_CONFIDENCE: f64 = 0.7;
const TEXT_DESCRIPTION_CONFIDENCE: f64 = 0.6;

struct AliasSpec {
    field: CandidateField,
    exact: &'static str,
    aliases: &'static [&'static str],
}

const FIELD_ALIASES: &[AliasSpec] = &[
    AliasSpec {
        field: CandidateField::Date,
        exact: "Date",
        aliases: &[
            "date",
            "transaction date",
            "trans date",
            "posting date",
            "posted date",
            "post date",
            "value date",
            "booking date",
        ],
    },
    AliasSpec {
        field: CandidateField::Description,
        exact: "Description",
        aliases: &[
            "description",
            "transaction description",
            "desc",
            "memo",
            "details",
            "narrative",
            "payee",
            "merchant",
            "name",
        ],
    },
    AliasSpec {
        field: CandidateField::Amount,
        exact: "Amount",
        aliases: &["amount", "transaction amount", "amt", "value", "total"],
    },
    AliasSpec {
        field: CandidateField::Credit,
        exact: "Credit",
        aliases: &[
            "credit",
            "credits",
            "credit amount",
            "deposit",
            "deposits",
            "money in",
            "paid in",
        ],
    },
    AliasSpec {
        field: CandidateField::Debit,
        exact: "Debit",
        aliases: &[
            "debit",
            "debits",
            "debit amount",
            "withdrawal",
            "withdrawals",
            "money out",
            "paid out",
        ],
    },
];

fn key_separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("key separator regex"))
}

/// Signed, parenthesized or currency-marked amounts. The leading group stands in
/// for a lookbehind so "A-12" is not read as a negative.
fn marked_amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:^|[^\w])(?P<amt>\(\s*-?[$£€¥]?\s*\d(?:[\d.,]*\d)?\s*\)|-\s*[$£€¥]?\s*\d(?:[\d.,]*\d)?|[$£€¥]\s*-?\s*\d(?:[\d.,]*\d)?)",
        )
        .expect("marked amount regex")
    })
}

fn decimal_amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:\d{1,3}(?:,\d{3})+|\d+)\.\d{2}\b|\b(?:\d{1,3}(?:\.\d{3})+|\d+),\d{2}\b")
            .expect("decimal amount regex")
    })
}

fn bare_amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b\d{1,3}(?:[.,]\d{3})*(?:[.,]\d{2})?\b").expect("bare amount regex")
    })
}

fn debit_credit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:debit|dr)\b[\s:]*(?P<debit>\(?-?[$£€¥]?\s*\d(?:[\d.,]*\d)?\)?)?[^\n]*?\b(?:credit|cr)\b[\s:]*(?P<credit>\(?-?[$£€¥]?\s*\d(?:[\d.,]*\d)?\)?)?",
        )
        .expect("debit credit regex")
    })
}

fn field_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:transaction date|posting date|posted|date|description|desc|memo|details|amount|amt|total|debit|credit|balance)\s*:",
        )
        .expect("field label regex")
    })
}

fn leftover_symbol_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[$£€¥]|\(\s*\)").expect("leftover symbol regex"))
}

fn ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("ws regex"))
}

fn normalize_key(raw: &str) -> String {
    key_separator_re()
        .replace_all(&raw.trim().to_lowercase(), " ")
        .trim()
        .to_string()
}

fn value_as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn lookup_field(row: &Map<String, Value>, spec: &AliasSpec) -> Option<String> {
    if let Some(text) = row.get(spec.exact).and_then(value_as_text) {
        return Some(text);
    }
    spec.aliases.iter().find_map(|alias| {
        row.iter()
            .find(|(key, _)| normalize_key(key) == *alias)
            .and_then(|(_, value)| value_as_text(value))
    })
}

fn mine_structured(row: &Map<String, Value>) -> FieldCandidates {
    let mut out = FieldCandidates::default();
    for spec in FIELD_ALIASES {
        let found = lookup_field(row, spec);
        let confidence = if found.is_some() {
            STRUCTURED_CONFIDENCE
        } else {
            0.0
        };
        out.confidence.insert(spec.field, confidence);
        match spec.field {
            CandidateField::Date => out.date = found,
            CandidateField::Description => out.description = found,
            CandidateField::Amount => out.amount = found.map(AmountCandidate::structured),
            CandidateField::Credit => out.credit = found,
            CandidateField::Debit => out.debit = found,
        }
    }

    if out.date.is_none() {
        out.errors.push("No date found in structured row".to_string());
    }
    if out.description.is_none() {
        out.errors
            .push("No description found in structured row".to_string());
    }
    if out.amount.is_none() && out.credit.is_none() && out.debit.is_none() {
        out.errors.push("No amount found in structured row".to_string());
    }
    out
}

fn blank_spans(text: &str, spans: &[Range<usize>]) -> String {
    let mut bytes = text.as_bytes().to_vec();
    for span in spans {
        for b in &mut bytes[span.clone()] {
            *b = b' ';
        }
    }
    // Spans always sit on char boundaries, so blanking whole spans keeps UTF-8 valid.
    String::from_utf8(bytes).unwrap_or_else(|_| text.to_string())
}

/// Every amount-shaped span, in tier order. The first entry is the primary guess.
fn amount_spans(text: &str) -> Vec<Range<usize>> {
    let marked = marked_amount_re()
        .captures_iter(text)
        .filter_map(|caps| caps.name("amt").map(|m| m.range()));
    let decimal = decimal_amount_re().find_iter(text).map(|m| m.range());
    let bare = bare_amount_re().find_iter(text).map(|m| m.range());
    marked.chain(decimal).chain(bare).collect()
}

fn mine_free_text(text: &str) -> FieldCandidates {
    let mut out = FieldCandidates::default();

    let dates = date_spans(text);
    match dates.first() {
        Some(first) => {
            out.date = Some(text[first.clone()].trim().to_string());
            out.confidence
                .insert(CandidateField::Date, TEXT_DATE_CONFIDENCE);
        }
        None => {
            out.errors.push("No date found".to_string());
            out.confidence.insert(CandidateField::Date, 0.0);
        }
    }

    let undated = blank_spans(text, &dates);
    let amounts = amount_spans(&undated);

    let split = debit_credit_re().captures(&undated).and_then(|caps| {
        let debit = caps.name("debit").map(|m| m.as_str().trim().to_string());
        let credit = caps.name("credit").map(|m| m.as_str().trim().to_string());
        if debit.is_none() && credit.is_none() {
            None
        } else {
            Some((debit, credit))
        }
    });

    if let Some((debit, credit)) = split {
        for (field, value) in [(CandidateField::Debit, &debit), (CandidateField::Credit, &credit)] {
            let confidence = if value.is_some() {
                TEXT_SPLIT_AMOUNT_CONFIDENCE
            } else {
                0.0
            };
            out.confidence.insert(field, confidence);
        }
        out.confidence.insert(CandidateField::Amount, 0.0);
        out.debit = debit;
        out.credit = credit;
    } else if let Some(primary) = amounts.first() {
        out.amount = Some(AmountCandidate::free_text(
            undated[primary.clone()].trim(),
            ws_re().replace_all(undated.trim(), " "),
        ));
        out.confidence
            .insert(CandidateField::Amount, TEXT_AMOUNT_CONFIDENCE);
        out.confidence.insert(CandidateField::Credit, 0.0);
        out.confidence.insert(CandidateField::Debit, 0.0);
    } else {
        out.errors.push("No amount found".to_string());
        for field in [
            CandidateField::Amount,
            CandidateField::Credit,
            CandidateField::Debit,
        ] {
            out.confidence.insert(field, 0.0);
        }
    }

    let remainder = blank_spans(&undated, &amounts);
    let remainder = field_label_re().replace_all(&remainder, " ");
    let remainder = leftover_symbol_re().replace_all(&remainder, " ");
    let description = ws_re().replace_all(remainder.trim(), " ").to_string();
    if description.is_empty() {
        out.errors.push("No description found".to_string());
        out.confidence.insert(CandidateField::Description, 0.0);
    } else {
        out.description = Some(description);
        out.confidence
            .insert(CandidateField::Description, TEXT_DESCRIPTION_CONFIDENCE);
    }

    out
}

/// Pulls raw date, amount and description candidates out of one record. Never fails:
/// anything missing is recorded as an error note with zero confidence.
pub fn mine(record: &RawRecord) -> FieldCandidates {
    let text = record.text().trim();
    if text.starts_with('{') && text.ends_with('}') {
        if let Ok(row) = serde_json::from_str::<Map<String, Value>>(text) {
            return mine_structured(&row);
        }
    }
    mine_free_text(record.text())
}
