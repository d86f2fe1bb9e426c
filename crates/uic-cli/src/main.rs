#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uic::{
    CacheConfig, CacheReport, Coordinator, FrontCache, MemSwapDevice, ReplaySummary, parse_trace,
    replay,
};

#[derive(Debug, Serialize)]
struct ReplayOutput {
    trace: String,
    summary: ReplaySummary,
    device_writes: u64,
    device_reads: u64,
    report: CacheReport,
}

fn main() {
    init_logging();
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "replay" => {
            let Some(trace) = args.next() else {
                bail!("replay requires a trace path");
            };
            let rest: Vec<String> = args.collect();
            let config = config_flag(&rest)?;
            let json = rest.iter().any(|a| a == "--json");
            let show_report = rest.iter().any(|a| a == "--report");
            replay_cmd(Path::new(&trace), config.as_deref(), json, show_report)
        }
        "dump-config" => {
            let rest: Vec<String> = args.collect();
            let config = load_config(config_flag(&rest)?.as_deref())?;
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("serialize config")?
            );
            Ok(())
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("uic\n");
    println!("USAGE:");
    println!("  uic replay <trace-path> [--config <path>] [--json] [--report]");
    println!("  uic dump-config [--config <path>]");
}

/// Value of `--config <path>`, if given.
fn config_flag(args: &[String]) -> Result<Option<PathBuf>> {
    let Some(pos) = args.iter().position(|a| a == "--config") else {
        return Ok(None);
    };
    match args.get(pos + 1) {
        Some(path) => Ok(Some(PathBuf::from(path))),
        None => bail!("--config requires a path"),
    }
}

fn load_config(path: Option<&Path>) -> Result<CacheConfig> {
    match path {
        Some(path) => CacheConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(CacheConfig::default()),
    }
}

fn replay_cmd(trace: &Path, config: Option<&Path>, json: bool, show_report: bool) -> Result<()> {
    let config = load_config(config)?;
    let text = fs::read_to_string(trace)
        .with_context(|| format!("failed to read trace {}", trace.display()))?;
    let events =
        parse_trace(&text).with_context(|| format!("failed to parse {}", trace.display()))?;

    let coordinator = Coordinator::new(config).context("invalid cache config")?;
    let front = FrontCache::new(MemSwapDevice::new(), Arc::new(coordinator));
    info!(events = events.len(), trace = %trace.display(), "replay_start");
    let summary = replay(&front, &events).context("replay failed")?;

    let output = ReplayOutput {
        trace: trace.display().to_string(),
        summary,
        device_writes: front.inner().writes(),
        device_reads: front.inner().reads(),
        report: front.coordinator().report(),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
        return Ok(());
    }

    let s = &output.summary;
    println!("uicache replay: {}", output.trace);
    println!("events: {}", s.events);
    println!("stores_cached: {}", s.stores_cached);
    println!("stores_to_device: {}", s.stores_to_device);
    println!("loads_from_cache: {}", s.loads_from_cache);
    println!("loads_from_device: {}", s.loads_from_device);
    println!("loads_missing: {}", s.loads_missing);
    println!("mismatches: {}", s.mismatches);
    println!("device_writes: {}", output.device_writes);
    println!("device_reads: {}", output.device_reads);
    println!(
        "stored_pages: {}/{}",
        output.report.stored_pages, output.report.max_entries
    );
    println!("hit_rate: {:.3}", output.report.stats.hit_rate());
    if show_report {
        println!();
        print!("{}", output.report.render_text());
    }
    if s.mismatches > 0 {
        bail!("{} loads returned stale or corrupt data", s.mismatches);
    }
    Ok(())
}
