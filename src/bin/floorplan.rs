//! Thin command-line glue around the core: read an input configuration
//! document, run the pipeline, write the augmented output document, and set
//! the process exit code from `floorplan_status` (spec.md section 6).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use floorplan_core::config;
use floorplan_core::pipeline;

struct Args {
    input: PathBuf,
    output: PathBuf,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let input = args.next().context("usage: floorplan <input.json> <output.json>")?;
    let output = args.next().context("usage: floorplan <input.json> <output.json>")?;
    Ok(Args { input: input.into(), output: output.into() })
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = parse_args()?;

    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading input configuration from {}", args.input.display()))?;
    let (raw, cfg) = config::parse_input(&text).context("parsing input configuration")?;

    let output = pipeline::run(&raw, &cfg).context("running floorplan/route/latency pipeline")?;
    let value = output.into_value();

    let succeeded = value.get("floorplan_status").and_then(|s| s.as_str()) == Some("SUCCEED");

    let rendered = serde_json::to_string_pretty(&value).context("serializing output configuration")?;
    std::fs::write(&args.output, rendered)
        .with_context(|| format!("writing output configuration to {}", args.output.display()))?;

    if succeeded {
        tracing::info!(output = %args.output.display(), "floorplan succeeded");
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!(output = %args.output.display(), "floorplan failed");
        Ok(ExitCode::FAILURE)
    }
}
