//! `ink history` commands, run against a live server.

use std::fmt::Write;

use anyhow::Result;
use serde_json::Value;

use inkling_core::interpreter::{InterpreterState, StreamInterpreter};
use inkling_core::models::HistoryRecord;

use crate::client::AnalysisClient;
use crate::config::Config;

pub async fn run_list(config: &Config, limit: i64) -> Result<()> {
    let client = AnalysisClient::from_config(&config.client)?;
    let records = client.list_history(limit).await?;

    if records.is_empty() {
        println!("No analysis history.");
        return Ok(());
    }

    for record in &records {
        let parsed = record
            .result
            .as_object()
            .map(|o| o.values().any(|v| v.as_array().is_some_and(|a| !a.is_empty())))
            .unwrap_or(false);
        println!(
            "{}  {}  {} fragment(s){}{}",
            record.id,
            record.created_at,
            record.fragment_ids.len(),
            record
                .target_fragment_id
                .as_deref()
                .map(|t| format!(", target {}", t))
                .unwrap_or_default(),
            if parsed { "" } else { "  (raw text only)" },
        );
    }
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let client = AnalysisClient::from_config(&config.client)?;
    client.delete_history(id).await?;
    println!("Deleted {}", id);
    Ok(())
}

pub async fn run_show(config: &Config, id: &str) -> Result<()> {
    let client = AnalysisClient::from_config(&config.client)?;
    let record = client.get_history(id).await?;
    print!("{}", describe(&record)?);
    Ok(())
}

/// Renders a stored run. The raw text is re-read through a reopened
/// interpreter, so the reported state is the one the run ended in.
fn describe(record: &HistoryRecord) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "{}  {}", record.id, record.created_at)?;
    writeln!(out, "fragments: {}", record.fragment_ids.join(", "))?;
    if let Some(target) = &record.target_fragment_id {
        writeln!(out, "target: {}", target)?;
    }

    let Some(raw) = &record.raw_text else {
        writeln!(out, "\n{}", serde_json::to_string_pretty(&record.result)?)?;
        return Ok(out);
    };

    let run = StreamInterpreter::<Value>::reopen(raw.clone());
    match run.state() {
        InterpreterState::Parsed => {
            writeln!(out, "state: parsed")?;
            writeln!(out, "\n{}", serde_json::to_string_pretty(&record.result)?)?;
        }
        _ => {
            writeln!(out, "state: raw text only")?;
            writeln!(out, "\n{}", run.text())?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(result: Value, raw_text: Option<&str>) -> HistoryRecord {
        HistoryRecord {
            id: "h1".into(),
            fragment_ids: vec!["a".into(), "b".into()],
            target_fragment_id: Some("a".into()),
            result,
            raw_text: raw_text.map(str::to_string),
            created_at: "2026-01-01T00:00:00.000Z".into(),
        }
    }

    #[test]
    fn test_parsed_run_shows_stored_result() {
        let stored = json!({"themes": [{"name": "tide", "heat_score": 3.0}]});
        let text = describe(&record(stored, Some("Sure:\n{\"themes\":[]}"))).unwrap();
        assert!(text.contains("state: parsed"));
        assert!(text.contains("\"heat_score\": 3.0"));
        assert!(text.contains("target: a"));
    }

    #[test]
    fn test_degraded_run_shows_raw_text() {
        let text = describe(&record(
            json!({"groups": [], "suggestions": []}),
            Some("no json {here"),
        ))
        .unwrap();
        assert!(text.contains("state: raw text only"));
        assert!(text.ends_with("no json {here\n"));
    }

    #[test]
    fn test_record_without_raw_text_prints_result() {
        let text = describe(&record(json!({"groups": []}), None)).unwrap();
        assert!(!text.contains("state:"));
        assert!(text.contains("\"groups\": []"));
    }
}
