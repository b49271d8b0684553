//! # ruleset-forge
//!
//! Fetch the remote rule lists named in a manifest and compile them into
//! sing-box `.srs` and mihomo `.mrs` rule-sets.
//!
//! ```bash
//! # Build everything in remote-rules.json into dist/
//! ruleset-forge
//!
//! # Custom manifest and compilers, keep emitted sources for inspection
//! ruleset-forge --manifest rules.yaml --singbox-bin ./bin/sing-box --keep-sources
//!
//! # sing-box only, JSON logs
//! ruleset-forge --skip-mihomo --log-format json
//! ```
//!
//! Per-source failures are reported in the summary and do not change the
//! exit code. Only fatal errors (missing manifest, missing compiler,
//! unwritable output directories) exit non-zero.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use ruleset_forge::{
    load_manifest, locate_binary, Behavior, HttpFetcher, MihomoConverter, Pipeline,
    PipelineOptions, RunSummary, SingBoxCompiler, SourceOutcome, Target, TargetStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Normalize remote routing rule lists into compiled rule-sets
#[derive(Parser, Debug)]
#[command(name = "ruleset-forge")]
#[command(version)]
#[command(about = "Compile remote routing rule lists into sing-box and mihomo rule-sets")]
struct Cli {
    /// Manifest listing the sources to build (JSON, or YAML by extension)
    #[arg(long, env = "RULES_MANIFEST", default_value = "remote-rules.json")]
    manifest: PathBuf,

    /// sing-box binary
    #[arg(long, env = "SINGBOX_BIN", default_value = "sing-box")]
    singbox_bin: PathBuf,

    /// mihomo binary
    #[arg(long, env = "MIHOMO_BIN", default_value = "mihomo")]
    mihomo_bin: PathBuf,

    /// Output directory for .srs artifacts
    #[arg(long, env = "SINGBOX_DIR", default_value = "dist/singbox")]
    singbox_dir: PathBuf,

    /// Output directory for .mrs artifacts
    #[arg(long, env = "MIHOMO_DIR", default_value = "dist/mihomo")]
    mihomo_dir: PathBuf,

    /// Directory for emitted compiler sources
    #[arg(long, env = "WORK_DIR", default_value = ".work")]
    work_dir: PathBuf,

    /// Compiler timeout in seconds
    #[arg(long, env = "COMPILE_TIMEOUT", default_value_t = 120)]
    compile_timeout: u64,

    /// Fetch timeout in seconds
    #[arg(long, env = "FETCH_TIMEOUT", default_value_t = 60)]
    fetch_timeout: u64,

    /// sing-box rule-set source version
    #[arg(long, env = "RULESET_VERSION", default_value_t = 3)]
    ruleset_version: u32,

    /// Keep previous artifacts when a rebuild fails or comes up empty
    #[arg(long)]
    no_strict: bool,

    /// Keep emitted sources in the work directory
    #[arg(long)]
    keep_sources: bool,

    /// Do not build sing-box rule-sets
    #[arg(long)]
    skip_singbox: bool,

    /// Do not build mihomo rule-sets
    #[arg(long)]
    skip_mihomo: bool,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

/// Initialize logging
fn init_logging(cli: &Cli) {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match cli.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

fn build_pipeline(cli: &Cli) -> Result<Pipeline> {
    if cli.skip_singbox && cli.skip_mihomo {
        bail!("nothing to build: both --skip-singbox and --skip-mihomo are set");
    }
    if cli.compile_timeout == 0 {
        bail!("--compile-timeout must be positive");
    }

    let options = PipelineOptions::new()
        .with_singbox_dir(&cli.singbox_dir)
        .with_mihomo_dir(&cli.mihomo_dir)
        .with_work_dir(&cli.work_dir)
        .with_strict(!cli.no_strict)
        .with_compile_timeout(Duration::from_secs(cli.compile_timeout))
        .with_keep_sources(cli.keep_sources)
        .with_ruleset_version(cli.ruleset_version);

    let fetcher = HttpFetcher::new(Duration::from_secs(cli.fetch_timeout));
    let mut pipeline = Pipeline::new(Box::new(fetcher), options);

    if !cli.skip_singbox {
        let bin = locate_binary(&cli.singbox_bin).context("sing-box is required")?;
        info!("using sing-box at {}", bin.display());
        pipeline = pipeline.with_compiler(Target::SingBox, Box::new(SingBoxCompiler::new(bin)));
    }

    if !cli.skip_mihomo {
        let bin = locate_binary(&cli.mihomo_bin).context("mihomo is required")?;
        info!("using mihomo at {}", bin.display());
        pipeline = pipeline
            .with_compiler(
                Target::MihomoDomain,
                Box::new(MihomoConverter::new(&bin, Behavior::Domain)),
            )
            .with_compiler(
                Target::MihomoIpCidr,
                Box::new(MihomoConverter::new(&bin, Behavior::IpCidr)),
            );
    }

    Ok(pipeline)
}

fn print_summary(summary: &RunSummary) {
    for result in &summary.results {
        let status = match &result.outcome {
            SourceOutcome::FetchFailed { reason } => format!("FETCH FAILED: {}", reason),
            SourceOutcome::Empty => "EMPTY".to_string(),
            SourceOutcome::Extracted => result
                .targets
                .iter()
                .map(|t| match &t.status {
                    TargetStatus::Built { bytes } => format!("{}={}B", t.target, bytes),
                    TargetStatus::NoRules => format!("{}=-", t.target),
                    TargetStatus::Failed { .. } => format!("{}=FAILED", t.target),
                })
                .collect::<Vec<_>>()
                .join(" "),
        };
        let format = result.format.map(|f| f.as_str()).unwrap_or("-");
        println!("{:<32} {:<13} {}", result.name, format, status);
    }

    println!(
        "\n{} succeeded, {} failed, {} empty, {} orphans removed",
        summary.succeeded, summary.failed, summary.emptied, summary.orphans_removed
    );
}

fn run(cli: &Cli) -> Result<()> {
    let sources = load_manifest(&cli.manifest)
        .with_context(|| format!("cannot load manifest {}", cli.manifest.display()))?;
    info!("loaded {} sources from {}", sources.len(), cli.manifest.display());

    let pipeline = build_pipeline(cli)?;
    let summary = pipeline.run(&sources).context("pipeline aborted")?;

    print_summary(&summary);
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = run(&cli) {
        error!("{:#}", e);
        process::exit(1);
    }
}
