use crate::model::{CanonicalTransaction, TransactionKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CsvLayout {
    /// `Date,Description,Amount` with a signed amount.
    #[default]
    ThreeColumn,
    /// `Date,Description,Debit,Credit` with the magnitude in one column.
    FourColumn,
}

impl CsvLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThreeColumn => "three-column",
            Self::FourColumn => "four-column",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "three-column" | "3-column" | "3" => Some(Self::ThreeColumn),
            "four-column" | "4-column" | "4" => Some(Self::FourColumn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateOrder {
    /// `MM/DD/YYYY`
    #[default]
    MonthFirst,
    /// `DD/MM/YYYY`
    DayFirst,
}

impl DateOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MonthFirst => "month-first",
            Self::DayFirst => "day-first",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "month-first" | "mm/dd/yyyy" => Some(Self::MonthFirst),
            "day-first" | "dd/mm/yyyy" => Some(Self::DayFirst),
            _ => None,
        }
    }

    fn pattern(&self) -> &'static str {
        match self {
            Self::MonthFirst => "%m/%d/%Y",
            Self::DayFirst => "%d/%m/%Y",
        }
    }
}

fn money(value: f64) -> String {
    format!("{value:.2}")
}

/// Renders transactions in an accounting-import CSV layout.
pub fn render_csv(
    transactions: &[CanonicalTransaction],
    layout: CsvLayout,
    date_order: DateOrder,
) -> Result<String, String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let header: &[&str] = match layout {
        CsvLayout::ThreeColumn => &["Date", "Description", "Amount"],
        CsvLayout::FourColumn => &["Date", "Description", "Debit", "Credit"],
    };
    writer
        .write_record(header)
        .map_err(|e| format!("failed to write csv header: {e}"))?;

    for txn in transactions {
        let date = txn.date().format(date_order.pattern()).to_string();
        let row = match layout {
            CsvLayout::ThreeColumn => vec![date, txn.description().to_string(), money(txn.amount())],
            CsvLayout::FourColumn => {
                let magnitude = money(txn.amount().abs());
                let (debit, credit) = match txn.kind() {
                    TransactionKind::Debit => (magnitude, String::new()),
                    TransactionKind::Credit => (String::new(), magnitude),
                };
                vec![date, txn.description().to_string(), debit, credit]
            }
        };
        writer
            .write_record(&row)
            .map_err(|e| format!("failed to write csv row: {e}"))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| format!("failed to flush csv: {e}"))?;
    String::from_utf8(bytes).map_err(|e| format!("csv output is not utf-8: {e}"))
}

pub fn write_csv_to_path(
    path: &Path,
    transactions: &[CanonicalTransaction],
    layout: CsvLayout,
    date_order: DateOrder,
) -> Result<(), String> {
    let text = render_csv(transactions, layout, date_order)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create output directory: {e}"))?;
    }
    fs::write(path, text).map_err(|e| format!("failed to write {}: {e}", path.display()))?;
    info!(
        file = %path.display(),
        rows = transactions.len(),
        layout = layout.as_str(),
        "csv written"
    );
    Ok(())
}
