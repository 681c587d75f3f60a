use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

pub const DEFAULT_RULE_FILE_NAMES: &[&str] = &[
    "merchant_map.csv",
    "boilerplate_phrases.csv",
    "sign_indicators.csv",
    "category_keywords.csv",
];

const EMBEDDED_RULE_FILES: &[(&str, &str)] = &[
    (
        "merchant_map.csv",
        include_str!("../data/rules/merchant_map.csv"),
    ),
    (
        "boilerplate_phrases.csv",
        include_str!("../data/rules/boilerplate_phrases.csv"),
    ),
    (
        "sign_indicators.csv",
        include_str!("../data/rules/sign_indicators.csv"),
    ),
    (
        "category_keywords.csv",
        include_str!("../data/rules/category_keywords.csv"),
    ),
];

#[derive(Debug, Clone)]
pub struct MerchantRule {
    pub abbreviation: String,
    pub canonical_name: String,
}

#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub category: String,
    pub keywords: Vec<String>,
}

/// Static lookup tables used by the normalizers, compiled once per load.
#[derive(Debug, Clone)]
pub struct RuleSet {
    merchants: Vec<MerchantRule>,
    boilerplate: Vec<Regex>,
    credit_re: Option<Regex>,
    debit_re: Option<Regex>,
    categories: Vec<CategoryRule>,
}

fn embedded_rule_text(file_name: &str) -> &'static str {
    EMBEDDED_RULE_FILES
        .iter()
        .find(|(name, _)| *name == file_name)
        .map(|(_, text)| *text)
        .unwrap_or_default()
}

fn read_rows(text: &str) -> Vec<HashMap<String, String>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());
    rdr.deserialize::<HashMap<String, String>>()
        .flatten()
        .collect()
}

fn cell(row: &HashMap<String, String>, key: &str) -> String {
    row.get(key).map(|s| s.trim().to_string()).unwrap_or_default()
}

fn parse_merchant_map(text: &str) -> Vec<MerchantRule> {
    read_rows(text)
        .into_iter()
        .filter_map(|row| {
            let abbreviation = cell(&row, "abbreviation");
            let canonical_name = cell(&row, "canonical_name");
            if abbreviation.is_empty() || canonical_name.is_empty() {
                return None;
            }
            Some(MerchantRule {
                abbreviation,
                canonical_name,
            })
        })
        .collect()
}

fn parse_boilerplate(text: &str) -> Vec<String> {
    read_rows(text)
        .into_iter()
        .map(|row| cell(&row, "phrase"))
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_sign_indicators(text: &str) -> (Vec<String>, Vec<String>) {
    let mut credit = Vec::new();
    let mut debit = Vec::new();
    for row in read_rows(text) {
        let phrase = cell(&row, "phrase").to_lowercase();
        if phrase.is_empty() {
            continue;
        }
        match cell(&row, "kind").to_lowercase().as_str() {
            "credit" => credit.push(phrase),
            "debit" => debit.push(phrase),
            _ => {}
        }
    }
    (credit, debit)
}

fn parse_category_keywords(text: &str) -> Vec<CategoryRule> {
    read_rows(text)
        .into_iter()
        .filter_map(|row| {
            let category = cell(&row, "category");
            let keywords = cell(&row, "keywords")
                .split('|')
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect::<Vec<_>>();
            if category.is_empty() || keywords.is_empty() {
                return None;
            }
            Some(CategoryRule { category, keywords })
        })
        .collect()
}

fn word_bounded(phrase: &str) -> String {
    let escaped = regex::escape(phrase);
    let starts_word = phrase.chars().next().is_some_and(|c| c.is_alphanumeric());
    let ends_word = phrase.chars().last().is_some_and(|c| c.is_alphanumeric());
    format!(
        "{}{}{}",
        if starts_word { r"\b" } else { "" },
        escaped,
        if ends_word { r"\b" } else { "" }
    )
}

fn phrase_alternation(phrases: &[String]) -> Option<Regex> {
    if phrases.is_empty() {
        return None;
    }
    let mut sorted = phrases.to_vec();
    sorted.sort_by_key(|p| std::cmp::Reverse(p.len()));
    let body = sorted
        .iter()
        .map(|p| word_bounded(p))
        .collect::<Vec<_>>()
        .join("|");
    Some(Regex::new(&format!("(?i)(?:{body})")).expect("phrase alternation regex"))
}

impl RuleSet {
    pub fn from_tables(
        mut merchants: Vec<MerchantRule>,
        boilerplate: Vec<String>,
        credit_phrases: Vec<String>,
        debit_phrases: Vec<String>,
        categories: Vec<CategoryRule>,
    ) -> Self {
        // Longest abbreviation first so "UBER EATS" is never shadowed by "UBER".
        merchants.sort_by_key(|m| std::cmp::Reverse(m.abbreviation.len()));
        let boilerplate = boilerplate
            .iter()
            .map(|p| {
                Regex::new(&format!(r"(?i){}\s*", word_bounded(p))).expect("boilerplate regex")
            })
            .collect();
        Self {
            merchants,
            boilerplate,
            credit_re: phrase_alternation(&credit_phrases),
            debit_re: phrase_alternation(&debit_phrases),
            categories,
        }
    }

    fn from_texts(merchants: &str, boilerplate: &str, signs: &str, categories: &str) -> Self {
        let (credit, debit) = parse_sign_indicators(signs);
        Self::from_tables(
            parse_merchant_map(merchants),
            parse_boilerplate(boilerplate),
            credit,
            debit,
            parse_category_keywords(categories),
        )
    }

    /// The versioned defaults shipped in `data/rules`.
    pub fn embedded() -> Self {
        Self::from_texts(
            embedded_rule_text("merchant_map.csv"),
            embedded_rule_text("boilerplate_phrases.csv"),
            embedded_rule_text("sign_indicators.csv"),
            embedded_rule_text("category_keywords.csv"),
        )
    }

    /// Loads each table from `dir`, falling back to the embedded default per file.
    pub fn load_from_dir(dir: &Path) -> Result<Self, String> {
        if !dir.is_dir() {
            return Err(format!("rules directory not found: {}", dir.display()));
        }
        let mut texts = Vec::with_capacity(DEFAULT_RULE_FILE_NAMES.len());
        for file_name in DEFAULT_RULE_FILE_NAMES {
            let path = dir.join(file_name);
            if path.is_file() {
                let text = fs::read_to_string(&path)
                    .map_err(|e| format!("failed to read rule file {}: {e}", path.display()))?;
                debug!(file = %path.display(), "loaded rule file");
                texts.push(text);
            } else {
                texts.push(embedded_rule_text(file_name).to_string());
            }
        }
        Ok(Self::from_texts(&texts[0], &texts[1], &texts[2], &texts[3]))
    }

    pub fn merchants(&self) -> &[MerchantRule] {
        &self.merchants
    }

    pub(crate) fn boilerplate(&self) -> &[Regex] {
        &self.boilerplate
    }

    pub(crate) fn credit_indicator_regex(&self) -> Option<&Regex> {
        self.credit_re.as_ref()
    }

    pub(crate) fn debit_indicator_regex(&self) -> Option<&Regex> {
        self.debit_re.as_ref()
    }

    pub fn categories(&self) -> &[CategoryRule] {
        &self.categories
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::embedded()
    }
}

/// Process-wide embedded rule set.
pub fn default_rules() -> &'static RuleSet {
    static RULES: OnceLock<RuleSet> = OnceLock::new();
    RULES.get_or_init(RuleSet::embedded)
}

pub fn resolve_rules(dir: Option<&Path>) -> Result<RuleSet, String> {
    match dir {
        Some(d) => RuleSet::load_from_dir(d),
        None => Ok(RuleSet::embedded()),
    }
}

/// Writes any missing default rule file into `dir` and returns the paths written.
pub fn ensure_rules_dir_seeded(dir: &Path) -> Result<Vec<PathBuf>, String> {
    fs::create_dir_all(dir).map_err(|e| format!("failed to create rules directory: {e}"))?;

    let mut written = Vec::new();
    for (file_name, text) in EMBEDDED_RULE_FILES {
        let target_path = dir.join(file_name);
        if target_path.exists() {
            continue;
        }
        fs::write(&target_path, text).map_err(|e| {
            format!(
                "failed to seed default rule file {}: {e}",
                target_path.display()
            )
        })?;
        written.push(target_path);
    }
    info!(dir = %dir.display(), seeded = written.len(), "rules directory ready");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir(prefix: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{prefix}_{}_{}", std::process::id(), Uuid::new_v4()))
    }

    #[test]
    fn embedded_rules_are_loaded_and_sorted_longest_first() {
        let rules = RuleSet::embedded();
        assert!(!rules.merchants().is_empty());
        let lens = rules
            .merchants()
            .iter()
            .map(|m| m.abbreviation.len())
            .collect::<Vec<_>>();
        assert!(lens.windows(2).all(|w| w[0] >= w[1]));
        let uber_eats = rules
            .merchants()
            .iter()
            .position(|m| m.abbreviation == "UBER EATS")
            .expect("uber eats rule");
        let uber = rules
            .merchants()
            .iter()
            .position(|m| m.abbreviation == "UBER")
            .expect("uber rule");
        assert!(uber_eats < uber);
        assert!(!rules.boilerplate().is_empty());
        assert!(rules.credit_indicator_regex().is_some());
        assert!(rules.debit_indicator_regex().is_some());
        assert_eq!(rules.categories()[0].category, "Groceries");
    }

    #[test]
    fn seeding_writes_missing_files_only_once() {
        let dir = temp_dir("stmt_rules_seed");
        let first = ensure_rules_dir_seeded(&dir).expect("seed rules");
        assert_eq!(first.len(), DEFAULT_RULE_FILE_NAMES.len());
        let second = ensure_rules_dir_seeded(&dir).expect("seed rules again");
        assert!(second.is_empty());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn directory_overrides_replace_only_present_tables() {
        let dir = temp_dir("stmt_rules_override");
        fs::create_dir_all(&dir).expect("create dir");
        fs::write(
            dir.join("merchant_map.csv"),
            "abbreviation,canonical_name\nACME CO,Acme Corporation\n",
        )
        .expect("write merchant map");

        let rules = RuleSet::load_from_dir(&dir).expect("load rules");
        assert_eq!(rules.merchants().len(), 1);
        assert_eq!(rules.merchants()[0].canonical_name, "Acme Corporation");
        assert!(!rules.boilerplate().is_empty());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_rules_dir_is_an_error() {
        let dir = temp_dir("stmt_rules_missing");
        assert!(RuleSet::load_from_dir(&dir).is_err());
    }
}
