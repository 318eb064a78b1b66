use cloudops_core::{Action, OperationStep, OutcomeRecord};
use colored::Colorize;
use serde_json::Value;

/// Text or JSON rendering of command results
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn value(&self, value: &Value) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// One row per item, with the given fields as columns
    pub fn items(&self, items: &[Value], columns: &[&str]) -> anyhow::Result<()> {
        if self.json {
            return self.value(&Value::Array(items.to_vec()));
        }
        if items.is_empty() {
            println!("{}", "(none)".dimmed());
            return Ok(());
        }

        let cells: Vec<Vec<String>> = items
            .iter()
            .map(|item| columns.iter().map(|c| cell(item, c)).collect())
            .collect();
        let widths: Vec<usize> = (0..columns.len())
            .map(|i| {
                cells
                    .iter()
                    .map(|row| row[i].len())
                    .chain(std::iter::once(columns[i].len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let header: Vec<String> = columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c.to_uppercase(), w = w))
            .collect();
        println!("{}", header.join("  ").bold());
        for row in cells {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(v, w)| format!("{:<w$}", v, w = w))
                .collect();
            println!("{}", line.join("  ").trim_end());
        }
        Ok(())
    }

    /// Report a compound operation; a failed record becomes an error
    pub fn outcome(&self, record: &OutcomeRecord, summary: &str) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(record)?);
        } else if record.is_success() {
            println!("{}", format!("✓ {}", summary).green().bold());
        }

        if record.is_success() {
            return Ok(());
        }

        for line in failure_report(record) {
            match line {
                ReportLine::Error(text) => eprintln!("{}", format!("✗ {}", text).red().bold()),
                ReportLine::Note(text) => eprintln!("  {}", text.dimmed()),
                ReportLine::Warning(text) => eprintln!("{}", format!("⚠ {}", text).yellow()),
                ReportLine::Item(text) => eprintln!("  - {}", text),
            }
        }

        match record.cause() {
            Some(cause) => anyhow::bail!("{} ({})", summary, cause.kind),
            None => anyhow::bail!("{} (cancelled)", summary),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReportLine {
    Error(String),
    Note(String),
    Warning(String),
    Item(String),
}

/// Why a record failed and what it left behind on the remote side
fn failure_report(record: &OutcomeRecord) -> Vec<ReportLine> {
    let mut lines = Vec::new();
    let Some(failed) = record.failed_step() else {
        return lines;
    };

    if record.is_cancelled() {
        lines.push(ReportLine::Error(format!("cancelled during {}", failed)));
    } else if let Some(cause) = record.cause() {
        lines.push(ReportLine::Error(format!(
            "{} failed: {}: {}",
            failed, cause.kind, cause.message
        )));
        if cause.retryable {
            lines.push(ReportLine::Note("the failure is retryable".to_string()));
        }
    }

    if let Some(response) = record.failed_response() {
        lines.push(ReportLine::Warning(accepted_step(failed, response)));
    }

    if !record.completed_steps().is_empty() {
        lines.push(ReportLine::Warning(
            "these steps completed and were not rolled back:".to_string(),
        ));
        for completed in record.completed_steps() {
            lines.push(ReportLine::Item(completed.step.to_string()));
        }
    }
    lines
}

/// A failed step whose call the remote side had already accepted
fn accepted_step(step: &OperationStep, response: &Value) -> String {
    let id = ["id", "name"]
        .iter()
        .find_map(|field| response.get(*field).and_then(Value::as_str));
    match (step.action(), id) {
        (Action::Create, Some(id)) => format!("created but not ready: {}", id),
        _ => format!("{} was accepted but did not finish", step),
    }
}

fn cell(item: &Value, column: &str) -> String {
    let value = column
        .split('.')
        .try_fold(item, |v, key| v.get(key));
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    }
}
