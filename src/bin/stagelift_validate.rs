use std::sync::Arc;

use anyhow::Context;
use stagelift_rs::{ConfigOverrides, MemoryTargetStore, Plan, UploadConfig, UploadState, Uploader};
use tracing_subscriber::EnvFilter;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

/// Parse the value given for a numeric `flag`, if the flag was given.
fn parse_count(flag: &str, value: Option<String>) -> anyhow::Result<Option<usize>> {
    value
        .map(|raw| {
            raw.parse::<usize>()
                .with_context(|| format!("invalid value for {flag}: {raw:?} is not a non-negative integer"))
        })
        .transpose()
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    println!(
        r#"stagelift_validate - Dry-run an upload plan against an in-memory store

Every stage is resolved and uploaded exactly as a real run would, but ids are
fabricated locally and no state is written.

USAGE:
    stagelift_validate --plan <PATH> [OPTIONS]

OPTIONS:
    --plan <PATH>         JSON upload plan
    -c, --config <PATH>   TOML config file (env: STAGELIFT_*)
    --threads <N>         Workers per stage
    --max-errors <N>      Failures tolerated per stage pass
    --partial             Upload only a sample of each stage
    -h, --help            Print this help
"#
    );
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if has_flag("-h") || has_flag("--help") {
        print_help();
        return;
    }

    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let plan_path = parse_arg("--plan").ok_or_else(|| anyhow::anyhow!("--plan is required"))?;
    let config_path = parse_arg("--config").or_else(|| parse_arg("-c"));
    let partial = has_flag("--partial");

    let overrides = ConfigOverrides {
        threads: parse_count("--threads", parse_arg("--threads"))?,
        max_errors: parse_count("--max-errors", parse_arg("--max-errors"))?,
        wet_run: Some(false),
        // Samples must be reproducible.
        shuffle: partial.then_some(false),
        ..ConfigOverrides::default()
    };
    let config = UploadConfig::load(config_path.as_deref(), overrides)?;

    let mut plan = Plan::from_json_file(&plan_path)?;
    if partial {
        plan = plan.sample(config.partial_sample);
    }
    let records = plan.record_count();

    let state = UploadState::for_config(&config);
    let uploader = Uploader::new(config, Arc::new(MemoryTargetStore::new()), state)?;
    let reports = uploader.upload(&mut plan)?;

    for report in &reports {
        println!(
            "{:<24} uploaded {:>7}  skipped {:>5}  recovered {:>5}  passes {}",
            report.stage, report.uploaded, report.skipped, report.recovered, report.passes
        );
    }
    println!("dry run uploaded {records} records across {} stages", reports.len());
    Ok(())
}
