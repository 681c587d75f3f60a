use crate::error::AmountError;
use crate::model::{AmountCandidate, CandidateField, TransactionKind};
use crate::rules_store::{default_rules, RuleSet};
use regex::Regex;
use std::sync::OnceLock;

fn non_numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\d.,\-]").expect("non numeric regex"))
}

/// How unsigned free-text amounts are classified when no keyword decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountPolicy {
    pub unsigned_text_default: TransactionKind,
}

impl Default for AmountPolicy {
    fn default() -> Self {
        Self {
            unsigned_text_default: TransactionKind::Debit,
        }
    }
}

/// What decided the sign of an amount. Surfaced in processing notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignEvidence {
    CreditColumn,
    DebitColumn,
    NegativeValue,
    DebitKeyword,
    CreditKeyword,
    StructuredSign,
    UnsignedDefault,
}

impl SignEvidence {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::CreditColumn => "credit column",
            Self::DebitColumn => "debit column",
            Self::NegativeValue => "negative value",
            Self::DebitKeyword => "debit keyword",
            Self::CreditKeyword => "credit keyword",
            Self::StructuredSign => "structured sign",
            Self::UnsignedDefault => "unsigned default",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmountOutcome {
    pub amount: f64,
    pub kind: TransactionKind,
    pub source: CandidateField,
    pub raw: String,
    pub evidence: SignEvidence,
}

/// Parses a monetary literal into a signed float. Parentheses mean negative; when
/// both `,` and `.` appear the later one is the decimal point; a lone comma is a
/// decimal point only when at most two digits follow it.
pub fn parse_magnitude(raw: &str) -> Result<f64, AmountError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Missing);
    }

    let parenthesized = trimmed.contains('(') && trimmed.contains(')');
    let mut cleaned = non_numeric_re().replace_all(trimmed, "").to_string();

    match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) => {
            cleaned = if comma > dot {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned.replace(',', "")
            };
        }
        (Some(comma), None) => {
            cleaned = if cleaned.len() - comma <= 3 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            };
        }
        _ => {}
    }

    let value = cleaned
        .parse::<f64>()
        .map_err(|_| AmountError::NotANumber(trimmed.to_string()))?;
    if !value.is_finite() {
        return Err(AmountError::NotANumber(trimmed.to_string()));
    }
    Ok(if parenthesized { -value.abs() } else { value })
}

fn nonzero_magnitude(raw: &str) -> Result<f64, AmountError> {
    let value = parse_magnitude(raw)?;
    if value == 0.0 {
        return Err(AmountError::Zero(raw.trim().to_string()));
    }
    Ok(value)
}

/// Credit phrases are blanked out before the debit scan so "payment received"
/// never also counts as "payment".
fn detect_indicators(text: &str, rules: &RuleSet) -> (bool, bool) {
    let mut masked = text.to_string();
    let mut is_credit = false;
    if let Some(re) = rules.credit_indicator_regex() {
        is_credit = re.is_match(text);
        masked = re
            .replace_all(text, |caps: &regex::Captures<'_>| " ".repeat(caps[0].len()))
            .to_string();
    }
    let is_debit = rules
        .debit_indicator_regex()
        .is_some_and(|re| re.is_match(&masked));
    (is_credit, is_debit)
}

/// Normalizes with the embedded rules and the default policy.
pub fn normalize(
    combined: Option<&AmountCandidate>,
    credit: Option<&str>,
    debit: Option<&str>,
) -> Result<(f64, TransactionKind), AmountError> {
    normalize_with(
        combined,
        credit,
        debit,
        default_rules(),
        AmountPolicy::default(),
    )
    .map(|o| (o.amount, o.kind))
}

pub fn normalize_with(
    combined: Option<&AmountCandidate>,
    credit: Option<&str>,
    debit: Option<&str>,
    rules: &RuleSet,
    policy: AmountPolicy,
) -> Result<AmountOutcome, AmountError> {
    let mut first_error: Option<AmountError> = None;
    let mut note_error = |err: AmountError| {
        if first_error.is_none() {
            first_error = Some(err);
        }
    };

    if let Some(raw) = credit.filter(|s| !s.trim().is_empty()) {
        match nonzero_magnitude(raw) {
            Ok(value) => {
                return Ok(AmountOutcome {
                    amount: value.abs(),
                    kind: TransactionKind::Credit,
                    source: CandidateField::Credit,
                    raw: raw.to_string(),
                    evidence: SignEvidence::CreditColumn,
                })
            }
            Err(err) => note_error(err),
        }
    }

    if let Some(raw) = debit.filter(|s| !s.trim().is_empty()) {
        match nonzero_magnitude(raw) {
            Ok(value) => {
                return Ok(AmountOutcome {
                    amount: -value.abs(),
                    kind: TransactionKind::Debit,
                    source: CandidateField::Debit,
                    raw: raw.to_string(),
                    evidence: SignEvidence::DebitColumn,
                })
            }
            Err(err) => note_error(err),
        }
    }

    let Some(candidate) = combined.filter(|c| !c.raw().trim().is_empty()) else {
        return Err(first_error.unwrap_or(AmountError::Missing));
    };

    let raw = candidate.raw();
    let value = nonzero_magnitude(raw)?;
    let (is_credit, is_debit) = detect_indicators(candidate.sign_context(), rules);

    let (kind, evidence) = if value < 0.0 {
        (TransactionKind::Debit, SignEvidence::NegativeValue)
    } else if is_debit {
        (TransactionKind::Debit, SignEvidence::DebitKeyword)
    } else if is_credit {
        (TransactionKind::Credit, SignEvidence::CreditKeyword)
    } else if candidate.is_structured() {
        (TransactionKind::Credit, SignEvidence::StructuredSign)
    } else {
        (policy.unsigned_text_default, SignEvidence::UnsignedDefault)
    };

    Ok(AmountOutcome {
        amount: kind.signed(value),
        kind,
        source: CandidateField::Amount,
        raw: raw.to_string(),
        evidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structured(s: &str) -> AmountCandidate {
        AmountCandidate::structured(s)
    }

    fn free(s: &str) -> AmountCandidate {
        AmountCandidate::free_text(s, s)
    }

    #[test]
    fn magnitude_handles_both_grouping_conventions() {
        assert_eq!(parse_magnitude("1.234,56"), Ok(1234.56));
        assert_eq!(parse_magnitude("1,234.56"), Ok(1234.56));
        assert_eq!(parse_magnitude("1,234"), Ok(1234.0));
        assert_eq!(parse_magnitude("12,5"), Ok(12.5));
        assert_eq!(parse_magnitude("€ 1.000.000,00"), Ok(1_000_000.0));
    }

    #[test]
    fn parentheses_and_minus_make_negative() {
        assert_eq!(parse_magnitude("($42.00)"), Ok(-42.0));
        assert_eq!(parse_magnitude("-$7.10"), Ok(-7.1));
    }

    #[test]
    fn non_numbers_are_rejected() {
        assert!(matches!(parse_magnitude("abc"), Err(AmountError::NotANumber(_))));
        assert!(matches!(parse_magnitude("1.2.3"), Err(AmountError::NotANumber(_))));
        assert_eq!(parse_magnitude(""), Err(AmountError::Missing));
    }

    #[test]
    fn separate_columns_decide_kind() {
        assert_eq!(
            normalize(None, None, Some("50.00")),
            Ok((-50.0, TransactionKind::Debit))
        );
        assert_eq!(
            normalize(None, Some("50.00"), None),
            Ok((50.0, TransactionKind::Credit))
        );
        assert_eq!(
            normalize(None, Some("0.00"), Some("12.00")),
            Ok((-12.0, TransactionKind::Debit))
        );
    }

    #[test]
    fn unsigned_free_text_defaults_to_debit() {
        assert_eq!(
            normalize(Some(&free("$123.45")), None, None),
            Ok((-123.45, TransactionKind::Debit))
        );
        let policy = AmountPolicy {
            unsigned_text_default: TransactionKind::Credit,
        };
        let outcome = normalize_with(Some(&free("$123.45")), None, None, default_rules(), policy)
            .expect("credit default");
        assert_eq!(outcome.amount, 123.45);
        assert_eq!(outcome.evidence, SignEvidence::UnsignedDefault);
    }

    #[test]
    fn structured_amount_keeps_literal_sign() {
        assert_eq!(
            normalize(Some(&structured("123.45")), None, None),
            Ok((123.45, TransactionKind::Credit))
        );
        assert_eq!(
            normalize(Some(&structured("-80.10")), None, None),
            Ok((-80.1, TransactionKind::Debit))
        );
    }

    #[test]
    fn keywords_are_whole_words_and_credit_phrases_mask_debit() {
        assert_eq!(
            normalize(Some(&free("150.00 CR")), None, None),
            Ok((150.0, TransactionKind::Credit))
        );
        assert_eq!(
            normalize(Some(&free("payment received 20.00")), None, None),
            Ok((20.0, TransactionKind::Credit))
        );
        assert_eq!(
            normalize(Some(&structured("20.00 fee")), None, None),
            Ok((-20.0, TransactionKind::Debit))
        );
        let outcome = normalize_with(
            Some(&structured("45.00 Crate")),
            None,
            None,
            default_rules(),
            AmountPolicy::default(),
        )
        .expect("structured");
        assert_eq!(outcome.evidence, SignEvidence::StructuredSign);
    }

    #[test]
    fn free_text_keywords_come_from_surrounding_text() {
        let refund = AmountCandidate::free_text("25.00", "Refund from Amazon 25.00");
        let outcome = normalize_with(Some(&refund), None, None, default_rules(), AmountPolicy::default())
            .expect("refund");
        assert_eq!(outcome.amount, 25.0);
        assert_eq!(outcome.kind, TransactionKind::Credit);
        assert_eq!(outcome.evidence, SignEvidence::CreditKeyword);
        assert_eq!(outcome.raw, "25.00");

        assert_eq!(
            normalize(Some(&AmountCandidate::free_text("1.20", "Interest paid 1.20 CR")), None, None),
            Ok((1.2, TransactionKind::Credit))
        );
        assert_eq!(
            normalize(Some(&AmountCandidate::free_text("9.99", "Card purchase refund 9.99")), None, None),
            Ok((-9.99, TransactionKind::Debit))
        );
        assert_eq!(
            normalize(Some(&AmountCandidate::free_text("$123.45", "Amount: $123.45")), None, None),
            Ok((-123.45, TransactionKind::Debit))
        );
    }

    #[test]
    fn zero_and_missing_amounts_fail() {
        assert_eq!(normalize(None, None, None), Err(AmountError::Missing));
        assert!(matches!(
            normalize(Some(&structured("0.00")), None, None),
            Err(AmountError::Zero(_))
        ));
        assert!(matches!(
            normalize(None, Some("0"), None),
            Err(AmountError::Zero(_))
        ));
        assert!(matches!(
            normalize(Some(&free("n/a")), None, None),
            Err(AmountError::NotANumber(_))
        ));
    }
}
