// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI module for LockTable
//!
//! Replays JSON workload scripts against an in-memory lock table and
//! reports what each step observed.

pub mod commands;
pub mod output;
pub mod runner;
pub mod script;

pub use commands::{Cli, Commands};

use colored::Colorize;
use std::path::PathBuf;

use commands::OutputFormat;
use locktable::LockTableConfig;
use output::ResultFormatter;
use runner::Runner;
use script::Script;

fn load_config(path: Option<PathBuf>) -> Result<LockTableConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(LockTableConfig::from_json_file(path)?),
        None => Ok(LockTableConfig::default()),
    }
}

/// Handle the run command
pub fn handle_run(
    script: PathBuf,
    config: Option<PathBuf>,
    format: OutputFormat,
    dump: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config)?;
    let script = Script::from_file(&script)?;
    let mut runner = Runner::new(config)?;
    let outcomes = runner.run(&script)?;

    print!("{}", ResultFormatter::format(&outcomes, format));
    if dump {
        println!("\n{}", "Lock table state".bold());
        print!("{}", runner.table());
    }
    Ok(())
}

/// Handle the config command
pub fn handle_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(Some(path))?;
    println!("{}", "Configuration is valid".green());
    print!("{}", ResultFormatter::format_config(&config));
    Ok(())
}
