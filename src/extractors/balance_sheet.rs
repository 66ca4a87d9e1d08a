use scraper::Html;
use tracing::debug;

use super::table::FlatTable;
use crate::error::ExtractError;
use crate::models::{FiscalPeriod, ReportFields};

const ITEM_COLUMN: &str = "會計項目";
const AMOUNT_COLUMN: &str = "金額";

/// Heading the portal prints above the statement, e.g. "民國111年第4季"
pub fn period_heading(period: FiscalPeriod) -> String {
    format!("民國{}年第{}季", period.year(), period.quarter())
}

/// Column label of the statement date, e.g. "111年12月31日"
pub fn closing_date_label(period: FiscalPeriod) -> String {
    let (month, day) = period.closing_month_day();
    format!("{}年{:02}月{:02}日", period.year(), month, day)
}

/// Parse a balance sheet page into `{row label: amount}` for the period's own column.
/// Comparative columns for earlier dates are ignored.
pub fn extract(html: &str, period: FiscalPeriod) -> Result<ReportFields, ExtractError> {
    let document = Html::parse_document(html);
    let tables = FlatTable::collect_all(&document);
    if tables.is_empty() {
        return Err(ExtractError::NoTables);
    }

    let heading = period_heading(period);
    let table = tables
        .iter()
        .find(|t| t.header_mentions(&heading))
        .ok_or_else(|| ExtractError::PeriodTableMissing {
            period,
            label: heading.clone(),
        })?;

    let item_col = table
        .find_column(&[ITEM_COLUMN])
        .ok_or_else(|| ExtractError::ColumnMissing {
            column: ITEM_COLUMN.to_string(),
        })?;

    let date_label = closing_date_label(period);
    let amount_col = table
        .find_column(&[date_label.as_str(), AMOUNT_COLUMN])
        .ok_or_else(|| ExtractError::ColumnMissing {
            column: format!("{} / {}", date_label, AMOUNT_COLUMN),
        })?;

    if table.body.is_empty() {
        return Err(ExtractError::NoRows);
    }

    let mut fields = ReportFields::new();
    for row in &table.body {
        let label = row.get(item_col).map(|s| s.trim()).unwrap_or_default();
        if label.is_empty() {
            continue;
        }
        let raw = row.get(amount_col).map(String::as_str).unwrap_or_default();
        match parse_amount(raw) {
            Some(value) => {
                fields.insert(label.to_string(), value);
            }
            None => debug!("skipping {:?}: unreadable amount {:?}", label, raw),
        }
    }

    if fields.is_empty() {
        return Err(ExtractError::NoRows);
    }

    Ok(fields)
}

/// Parse a thousand-separated amount. Parentheses mean negative; blank and
/// dash cells are zero.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    if matches!(cleaned.as_str(), "" | "-" | "--" | "－") {
        return Some(0.0);
    }

    let (negative, digits) = match cleaned.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, cleaned.as_str()),
    };

    let value = digits.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(if negative { -value } else { value })
}
