use crate::rules_store::{default_rules, MerchantRule, RuleSet};
use regex::Regex;
use std::sync::OnceLock;

pub const UNCATEGORIZED: &str = "Uncategorized";

fn trailing_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{1,2}/\d{1,2}/\d{2,4}$").expect("trailing date regex"))
}

fn trailing_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{6,}$").expect("trailing id regex"))
}

fn trailing_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#\d{4,}$").expect("trailing ref regex"))
}

fn ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("ws regex"))
}

fn collapse_ws(raw: &str) -> String {
    ws_re().replace_all(raw.trim(), " ").trim().to_string()
}

fn strip_trailing_tokens(text: &str) -> String {
    let mut current = text.trim_end().to_string();
    loop {
        let mut next = current.clone();
        for re in [trailing_date_re(), trailing_id_re(), trailing_ref_re()] {
            next = re.replace(&next, "").trim_end().to_string();
        }
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Apostrophes count as word characters so "McDonald's" is one token.
fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || c == '\''
}

fn matches_at(text: &str, start: usize, rule: &MerchantRule) -> bool {
    let pattern = rule.abbreviation.as_bytes();
    let end = start + pattern.len();
    let Some(window) = text.as_bytes().get(start..end) else {
        return false;
    };
    if !window.eq_ignore_ascii_case(pattern) {
        return false;
    }
    let starts_word = rule
        .abbreviation
        .chars()
        .next()
        .is_some_and(|c| c.is_alphanumeric());
    if starts_word && text[..start].chars().next_back().is_some_and(is_token_char) {
        return false;
    }
    let ends_word = rule
        .abbreviation
        .chars()
        .last()
        .is_some_and(|c| c.is_alphanumeric());
    if ends_word && text.get(end..).and_then(|s| s.chars().next()).is_some_and(is_token_char) {
        return false;
    }
    // A non-ASCII match region would split a character.
    text.is_char_boundary(end)
}

/// A longer rule that matches the canonical name followed by the rest of the text,
/// with the number of bytes of `rest` it swallows.
fn extension<'a>(
    canonical: &str,
    separator: &str,
    rest: &str,
    merchants: &'a [MerchantRule],
) -> Option<(&'a MerchantRule, usize)> {
    let joined = format!("{canonical}{separator}{rest}");
    let prefix = canonical.len() + separator.len();
    merchants
        .iter()
        .filter(|rule| rule.abbreviation.len() > prefix)
        .find(|rule| matches_at(&joined, 0, rule))
        .map(|rule| (rule, rule.abbreviation.len() - prefix))
}

/// Replaces merchant abbreviations in one left-to-right pass. Replacement text is
/// never re-scanned on its own, so "Uber Eats" cannot turn back into "Uber". A
/// replacement that together with the following text spells a longer abbreviation
/// ("UBER *EATS" reads as "Uber EATS") takes that rule instead.
fn apply_merchant_map(text: &str, merchants: &[MerchantRule]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    while cursor < text.len() {
        let hit = merchants.iter().find(|rule| matches_at(text, cursor, rule));
        match hit {
            Some(rule) => {
                let mut canonical = rule.canonical_name.as_str();
                let mut end = cursor + rule.abbreviation.len();
                loop {
                    let glued = text[end..].chars().next().is_some_and(char::is_alphanumeric);
                    let separator = if glued { " " } else { "" };
                    match extension(canonical, separator, &text[end..], merchants) {
                        Some((longer, consumed)) => {
                            canonical = longer.canonical_name.as_str();
                            end += consumed;
                        }
                        None => break,
                    }
                }
                out.push_str(canonical);
                if text[end..].chars().next().is_some_and(char::is_alphanumeric) {
                    out.push(' ');
                }
                cursor = end;
            }
            None => {
                let Some(ch) = text[cursor..].chars().next() else {
                    break;
                };
                out.push(ch);
                cursor += ch.len_utf8();
            }
        }
    }
    out
}

fn is_acronym(word: &str) -> bool {
    let mut has_cased = false;
    for c in word.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            has_cased = true;
        }
    }
    has_cased && word.chars().count() > 1
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|w| {
            if is_acronym(w) {
                w.to_string()
            } else {
                capitalize(w)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cleans a raw description with the embedded rules.
pub fn normalize(raw: Option<&str>) -> Option<String> {
    normalize_with(raw, default_rules())
}

pub fn normalize_with(raw: Option<&str>, rules: &RuleSet) -> Option<String> {
    let mut text = raw.map(str::trim).unwrap_or_default().to_string();
    if text.is_empty() {
        return None;
    }

    for re in rules.boilerplate() {
        text = re.replace_all(&text, "").to_string();
    }
    text = strip_trailing_tokens(&text);
    text = collapse_ws(&text);
    text = apply_merchant_map(&text, rules.merchants());
    text = title_case(&collapse_ws(&text));

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// First category whose keyword appears in the description.
pub fn categorize(description: &str) -> String {
    categorize_with(description, default_rules())
}

pub fn categorize_with(description: &str, rules: &RuleSet) -> String {
    let lower = description.to_lowercase();
    rules
        .categories()
        .iter()
        .find(|rule| rule.keywords.iter().any(|k| lower.contains(k.as_str())))
        .map(|rule| rule.category.clone())
        .unwrap_or_else(|| UNCATEGORIZED.to_string())
}
