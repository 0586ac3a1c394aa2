//! `ink analyze`: stream an analysis from the server to the terminal.
//!
//! Text is printed as it arrives. Once the stream ends the structured
//! result (or the raw text, if none could be extracted) is summarised and
//! the run is saved to history.

use std::io::Write;

use anyhow::{bail, Result};

use inkling_core::interpreter::InterpreterState;
use inkling_core::models::Fragment;

use crate::client::{AnalysisClient, AnalysisOutput, AnalysisSession};
use crate::config::Config;

pub async fn run_analyze(
    config: &Config,
    ids: &[String],
    relation: bool,
    target: Option<&str>,
) -> Result<()> {
    let client = AnalysisClient::from_config(&config.client)?;

    if relation {
        let session = client.analyze_relations(ids.to_vec()).await?;
        return drive(session).await;
    }

    let fragments = client.list_fragments().await?;
    let lookup = |id: &str| -> Result<Fragment> {
        match fragments.iter().find(|f| f.id == id) {
            Some(f) => Ok(f.clone()),
            None => bail!("fragment not found: {}", id),
        }
    };
    let selected = ids
        .iter()
        .map(|id| lookup(id))
        .collect::<Result<Vec<_>>>()?;
    let target = target.map(|id| lookup(id)).transpose()?;

    let session = client.analyze(selected, target).await?;
    drive(session).await
}

async fn drive<T: AnalysisOutput>(mut session: AnalysisSession<T>) -> Result<()> {
    let mut stdout = std::io::stdout();
    let mut printed = 0;
    while let Some(text) = session.next_update().await {
        write!(stdout, "{}", &text[printed..])?;
        stdout.flush()?;
        printed = text.len();
    }
    println!();

    match session.finish() {
        InterpreterState::Parsed => {
            println!();
            println!("Structured result");
            println!("=================");
            if let Some(value) = session.value() {
                println!("{}", serde_json::to_string_pretty(value)?);
            }
        }
        _ => {
            println!();
            println!("No structured result could be extracted; raw text kept above.");
        }
    }

    for notice in session.interpreter().notices() {
        eprintln!("warning: {}", notice);
    }

    match session.save_history().await? {
        Some(record) => println!("Saved to history as {}", record.id),
        None => println!("Nothing to save."),
    }
    Ok(())
}
