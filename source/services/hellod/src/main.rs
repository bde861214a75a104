// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: hellod entrypoint wiring logging and the CLI to the demo exchange

fn main() {
    env_logger::init();
    if let Err(err) = hellod::cli::run() {
        eprintln!("hellod: exited with error: {err}");
        std::process::exit(1);
    }
}
