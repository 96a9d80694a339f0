// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Result formatting for CLI output

use colored::*;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};

use super::commands::OutputFormat;
use super::runner::StepOutcome;
use locktable::LockTableConfig;

/// Formatter for step outcomes in different output formats
pub struct ResultFormatter;

impl ResultFormatter {
    pub fn format(outcomes: &[StepOutcome], format: OutputFormat) -> String {
        match format {
            OutputFormat::Table => Self::format_table(outcomes),
            OutputFormat::Json => Self::format_json(outcomes),
        }
    }

    /// Format outcomes as a table using comfy-table
    fn format_table(outcomes: &[StepOutcome]) -> String {
        if outcomes.is_empty() {
            return format!("{}\n", "No steps executed".yellow());
        }

        let failed = outcomes.iter().filter(|o| !o.ok).count();
        let mut output = String::new();
        output.push_str(&format!("{}\n", "Workload Results".bold().green()));
        output.push_str(&format!("Steps: {}, failed: {}\n\n", outcomes.len(), failed));

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec![
            Cell::new("#").fg(Color::Green),
            Cell::new("op").fg(Color::Green),
            Cell::new("result").fg(Color::Green),
        ]);
        for outcome in outcomes {
            let result = if outcome.ok {
                Cell::new(&outcome.detail)
            } else {
                Cell::new(&outcome.detail).fg(Color::Red)
            };
            table.add_row(vec![
                Cell::new(outcome.step),
                Cell::new(outcome.op),
                result,
            ]);
        }

        output.push_str(&table.to_string());
        output.push('\n');
        output
    }

    /// Format outcomes as JSON
    fn format_json(outcomes: &[StepOutcome]) -> String {
        let failed = outcomes.iter().filter(|o| !o.ok).count();
        let json = serde_json::json!({
            "status": if failed == 0 { "success" } else { "partial" },
            "steps": outcomes,
            "failed": failed,
        });
        serde_json::to_string_pretty(&json).unwrap_or_else(|_| {
            "{\"status\": \"error\", \"error\": \"Could not serialize results to JSON\"}"
                .to_string()
        })
    }

    /// Describe an effective configuration
    pub fn format_config(config: &LockTableConfig) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec![
            Cell::new("setting").fg(Color::Green),
            Cell::new("value").fg(Color::Green),
        ]);
        table.add_row(vec!["max_locks".to_string(), config.max_locks.to_string()]);
        table.add_row(vec![
            "lock_count_check_interval".to_string(),
            config.lock_count_check_interval.to_string(),
        ]);
        table.add_row(vec![
            "low_watermark".to_string(),
            format!("{} ({})", config.low_watermark(), config.low_watermark_ratio),
        ]);
        table.add_row(vec![
            "finalized_txn_cache_size".to_string(),
            config.finalized_txn_cache_size.to_string(),
        ]);
        table.add_row(vec![
            "pushed_txn_cache_size".to_string(),
            config.pushed_txn_cache_size.to_string(),
        ]);
        table.add_row(vec![
            "track_uncontended_replicated_locks".to_string(),
            config.track_uncontended_replicated_locks.to_string(),
        ]);
        format!("{}\n", table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(ok: bool, detail: &str) -> StepOutcome {
        StepOutcome {
            step: 1,
            op: "scan",
            ok,
            detail: detail.to_string(),
            data: None,
        }
    }

    #[test]
    fn test_json_reports_partial_failure() {
        let out = ResultFormatter::format(
            &[outcome(true, "req 1: proceed"), outcome(false, "boom")],
            OutputFormat::Json,
        );
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["status"], "partial");
        assert_eq!(value["failed"], 1);
        assert_eq!(value["steps"][1]["detail"], "boom");
    }

    #[test]
    fn test_table_lists_every_step() {
        let out = ResultFormatter::format(&[outcome(true, "req 1: proceed")], OutputFormat::Table);
        assert!(out.contains("req 1: proceed"));
        assert!(out.contains("Steps: 1, failed: 0"));
    }

    #[test]
    fn test_config_table() {
        let out = ResultFormatter::format_config(&LockTableConfig::default());
        assert!(out.contains("max_locks"));
        assert!(out.contains("10000"));
    }
}
