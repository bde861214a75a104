// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! User-facing CLI helpers for the hellod binary.

use std::path::Path;

use nexus_rendezvous::RendezvousConfig;

use crate::{run_demo, DemoError};

/// Returns the CLI usage string for hellod.
pub fn help() -> &'static str {
    "hellod runs a rendezvous hello exchange. Usage: hellod [--config <path>] [--help]"
}

/// Executes the CLI using provided arguments.
pub fn execute(args: &[&str]) -> Result<String, DemoError> {
    let mut config = RendezvousConfig::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "--help" | "-h" => return Ok(help().to_string()),
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| DemoError::Usage("--config needs a path".to_string()))?;
                config = RendezvousConfig::load(Path::new(path))?;
            }
            other => return Err(DemoError::Usage(format!("unknown argument `{other}`"))),
        }
    }
    let outcome = run_demo(config)?;
    Ok(format!("Server replied: {}", outcome.reply))
}

/// Parses `std::env::args` and prints the execution result.
pub fn run() -> Result<(), DemoError> {
    let owned: Vec<String> = std::env::args().skip(1).collect();
    let refs: Vec<&str> = owned.iter().map(|s| s.as_str()).collect();
    println!("{}", execute(&refs)?);
    Ok(())
}
