//! Normalization of incoming records into complete, renderable entries.
//!
//! The bridge forwards whatever the event source sent, and the polling
//! path returns rows the backend already formatted. Either way the cache
//! must hold complete records, so every optional field gets a default here.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One scan event, fully populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub time_log: String,
    pub time_log_formatted: String,
    pub date: String,
    pub time_12hr: String,
    pub rfid_data: String,
    pub rfid_status: bool,
    pub status_text: String,
    pub found: bool,
}

/// One registered tag, as returned by the registration listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub id: i64,
    pub rfid_data: String,
    pub rfid_status: bool,
    pub status_text: String,
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty() && s != "0" && s != "false",
        _ => false,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Backend rows carry "Y-m-d H:i:s" without an offset.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Fill defaults so the entry is complete regardless of what the sender
/// included. Missing id falls back to the receipt instant in millis.
pub fn normalize_log_entry(incoming: &Value) -> LogEntry {
    let id = incoming
        .get("id")
        .and_then(Value::as_i64)
        .unwrap_or_else(|| Utc::now().timestamp_millis());

    let time = incoming
        .get("time_log")
        .or_else(|| incoming.get("timestamp"))
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);

    let time_log_formatted = incoming
        .get("time_log_formatted")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| time.format("%Y-%m-%d %I:%M:%S %p").to_string());

    let date = incoming
        .get("date")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| time.format("%Y-%m-%d").to_string());

    let time_12hr = incoming
        .get("time_12hr")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| time.format("%I:%M:%S %p").to_string());

    let rfid_status = truthy(incoming.get("rfid_status"));
    let found_field = incoming.get("found").and_then(Value::as_bool);

    let status_text = match incoming.get("status_text").and_then(Value::as_str) {
        Some(text) => text.to_string(),
        None if found_field == Some(false) => "RFID NOT FOUND".to_string(),
        None if rfid_status => "1".to_string(),
        None => "0".to_string(),
    };

    let found = found_field.unwrap_or(status_text != "RFID NOT FOUND");

    LogEntry {
        id,
        time_log: time.to_rfc3339_opts(SecondsFormat::Millis, true),
        time_log_formatted,
        date,
        time_12hr,
        rfid_data: incoming
            .get("rfid_data")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string(),
        rfid_status,
        status_text,
        found,
    }
}

pub fn normalize_registration(incoming: &Value) -> Registration {
    let rfid_status = truthy(incoming.get("rfid_status"));
    let status_text = incoming
        .get("status_text")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| if rfid_status { "1" } else { "0" }.to_string());

    Registration {
        id: incoming.get("id").and_then(Value::as_i64).unwrap_or(0),
        rfid_data: incoming
            .get("rfid_data")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string(),
        rfid_status,
        status_text,
    }
}
