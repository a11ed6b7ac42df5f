//! Inbound settlement ("liquidação") rows

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire names of the fields every settlement row must carry
pub const REQUIRED_WIRE_FIELDS: [&str; 4] = ["chave", "revisao", "valor", "data_liquidacao"];

/// One page of raw rows fetched from the Regulator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcePage {
    pub rows: Vec<Value>,
    /// Cursor for the following page; `None` on the last page
    pub next_cursor: Option<String>,
}

/// Settlement row after structural parsing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRow {
    /// Regulator's natural key
    pub natural_key: String,
    /// Source-provided freshness marker; higher is newer
    pub revision: i64,
    pub contract_external_id: Option<String>,
    pub commitment_number: Option<String>,
    pub amount_cents: i64,
    pub settled_on: NaiveDate,
    pub creditor_document: Option<String>,
    pub description: Option<String>,
}

/// Reason a raw row could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowIssue {
    /// 1-based page number within the run
    pub page: usize,
    /// Position of the row within its page
    pub index: usize,
    pub natural_key: Option<String>,
    pub message: String,
}

impl SettlementRow {
    /// Parse a raw row, rejecting rows that lack required wire fields
    pub fn from_wire(raw: &Value) -> Result<Self, String> {
        let object = raw
            .as_object()
            .ok_or_else(|| "row is not a JSON object".to_string())?;

        let missing: Vec<&str> = REQUIRED_WIRE_FIELDS
            .iter()
            .copied()
            .filter(|field| object.get(*field).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing required fields: {}", missing.join(", ")));
        }

        let natural_key = wire_text(object.get("chave"))
            .ok_or_else(|| "chave must be a non-empty string".to_string())?;
        let revision = wire_integer(&object["revisao"])
            .ok_or_else(|| "revisao must be an integer".to_string())?;
        let amount_cents = parse_money(&object["valor"])
            .ok_or_else(|| "valor must be a decimal amount".to_string())?;
        let settled_on = object["data_liquidacao"]
            .as_str()
            .and_then(parse_wire_date)
            .ok_or_else(|| "data_liquidacao must be a dd/mm/yyyy or yyyy-mm-dd date".to_string())?;

        Ok(Self {
            natural_key,
            revision,
            contract_external_id: wire_text(object.get("contrato")),
            commitment_number: wire_text(object.get("empenho")),
            amount_cents,
            settled_on,
            creditor_document: wire_text(object.get("credor_documento")),
            description: wire_text(object.get("historico")),
        })
    }

    /// Best-effort natural key of a row that failed parsing
    pub fn natural_key_of(raw: &Value) -> Option<String> {
        wire_text(raw.get("chave"))
    }
}

fn wire_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn wire_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a decimal amount ("1234.56", "1234,56" or a JSON number) into cents
pub fn parse_money(value: &Value) -> Option<i64> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().replace(',', "."),
        _ => return None,
    };

    let negative = text.starts_with('-');
    let unsigned = text.trim_start_matches('-');
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (unsigned, ""),
    };

    if whole.is_empty()
        || !whole.chars().all(|c| c.is_ascii_digit())
        || fraction.len() > 2
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let whole: i64 = whole.parse().ok()?;
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };

    let cents = whole.checked_mul(100)?.checked_add(fraction)?;
    Some(if negative { -cents } else { cents })
}

/// Parse a Regulator date (dd/mm/yyyy) or an ISO date
pub fn parse_wire_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .ok()
}

/// What an upsert did with one row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No local row had this natural key
    Inserted,
    /// Local row existed with an older revision
    Updated,
    /// Local row already at this revision or newer
    Skipped,
}
