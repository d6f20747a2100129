//! optimize: one-shot CLI for the cutting engine.
//!
//! Reads a JSON job (the same body `POST /optimize` accepts) from a file or
//! stdin, runs the engine synchronously, and prints the result JSON to
//! stdout. Validation failures print the validator report and exit non-zero.
//!
//! Usage:
//!   optimize <job.json>
//!   cat job.json | optimize -

#![forbid(unsafe_code)]

use std::io::Read;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use steelcut::config::Config;
use steelcut::driver::{optimize, CancelFlag, EngineError, NoProgress};
use steelcut::model::{Constraints, DesignBar, ModuleStock, OptimizeInput};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobFile {
    design_steels: Vec<DesignBar>,
    module_steels: Vec<ModuleStock>,
    #[serde(default)]
    constraints: Option<Constraints>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "steelcut=info".into()))
        .with_target(false)
        .compact()
        .init();

    let arg = std::env::args().nth(1).context("usage: optimize <job.json | ->")?;
    let raw = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read job from stdin")?;
        buf
    } else {
        std::fs::read_to_string(&arg).with_context(|| format!("read job file {arg}"))?
    };

    let job: JobFile = serde_json::from_str(&raw).context("parse job JSON")?;
    let config = Config::from_env();
    let input = OptimizeInput {
        design_steels: job.design_steels,
        module_steels: job.module_steels,
        constraints: job
            .constraints
            .unwrap_or_else(|| config.default_constraints()),
    };

    info!(
        designs = input.design_steels.len(),
        modules = input.module_steels.len(),
        "running optimization"
    );

    match optimize(&input, &NoProgress, &CancelFlag::new()) {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(EngineError::InvalidConstraints(report)) => {
            eprintln!("{}", serde_json::to_string_pretty(&report)?);
            anyhow::bail!("constraint validation failed");
        }
        Err(e) => Err(e.into()),
    }
}
