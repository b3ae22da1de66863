use anyhow::Context;
use clap::{Parser, Subcommand};
use gallery_builder::manifest::ForceModes;
use gallery_builder::{builder, config};
use std::path::PathBuf;

/// Force-mode flags for commands that run the pipeline.
#[derive(clap::Args, Clone)]
struct BuildArgs {
    /// Reprocess every object, ignoring fingerprints
    #[arg(long)]
    force: bool,

    /// Re-extract metadata for unchanged objects (derivatives reused)
    #[arg(long, conflicts_with = "force")]
    force_manifest: bool,

    /// Regenerate thumbnails for unchanged objects (metadata reused)
    #[arg(long, conflicts_with = "force")]
    force_thumbnails: bool,

    /// Run the pipeline without uploading the manifest or deleting derivatives
    #[arg(long)]
    dry_run: bool,
}

fn version_string() -> &'static str {
    if env!("RELEASE_TAG_BUILD") == "true" {
        return env!("CARGO_PKG_VERSION");
    }
    let hash = env!("GIT_HASH");
    if hash.is_empty() {
        "dev@unknown"
    } else {
        // Leaked once at startup — trivial, called exactly once
        Box::leak(format!("dev@{hash}").into_boxed_str())
    }
}

#[derive(Parser)]
#[command(name = "gallery-builder")]
#[command(about = "Photo ingestion pipeline for object-store galleries")]
#[command(long_about = "\
Photo ingestion pipeline for object-store galleries

Scans an S3-compatible bucket (or a local git working tree), decodes new
and changed photos, extracts EXIF and vendor recipes, generates thumbnails
and ThumbHash placeholders, and commits an incremental manifest.json that
downstream galleries serve verbatim.

Change detection is fingerprint-based (etag + size + lastModified): a
rebuild against an unchanged store reprocesses nothing and produces an
identical manifest. Live Photo video companions (IMG_0001.heic +
IMG_0001.mov) are paired automatically.

Failures are per-object: a corrupt photo is reported in the summary and
the rest of the build publishes. Exit status 2 signals partial success.

Run 'gallery-builder gen-config' for a documented builder.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Path to the builder config file
    #[arg(long, default_value = "builder.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline: list, diff, process, commit
    Build(BuildArgs),
    /// Validate config and storage reachability without touching anything
    Check,
    /// Print a stock builder.toml with all options documented
    GenConfig,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if matches!(&cli.command, Command::GenConfig) {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    init_logging(&cfg.logging)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Command::Build(args) => {
            let summary = runtime.block_on(run_build(cfg, &args))?;
            println!("Build: {summary}");
            if summary.is_partial() {
                for key in &summary.failed_keys {
                    eprintln!("failed: {key}");
                }
                // Partial success: manifest committed, operator attention needed.
                std::process::exit(2);
            }
        }
        Command::Check => {
            runtime.block_on(run_check(cfg))?;
            println!("==> Config and storage are reachable");
        }
        Command::GenConfig => unreachable!("handled above"),
    }

    Ok(())
}

async fn run_build(
    cfg: config::BuilderConfig,
    args: &BuildArgs,
) -> anyhow::Result<builder::RunSummary> {
    let ctx = builder::BuildContext::from_config(cfg)
        .await
        .context("initializing storage provider")?;

    // Ctrl-C stops dispatching new work; in-flight objects finish and the
    // previous manifest stays committed.
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling — letting in-flight work finish");
            cancel.cancel();
        }
    });

    let force = ForceModes {
        force: args.force,
        force_manifest: args.force_manifest,
        force_thumbnails: args.force_thumbnails,
    };

    let outcome = builder::build(&ctx, force, args.dry_run).await?;
    Ok(outcome.summary)
}

async fn run_check(cfg: config::BuilderConfig) -> anyhow::Result<()> {
    let provider = builder::provider_from_config(&cfg)
        .await
        .context("initializing storage provider")?;
    let images = provider.list_images().await.context("listing images")?;
    println!("==> {} image objects visible", images.len());
    Ok(())
}

/// Install the tracing subscriber from logging config.
///
/// `RUST_LOG` wins over the config level when set, so ad-hoc debugging
/// doesn't require a config edit.
fn init_logging(logging: &config::LoggingConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.file.is_empty() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&logging.file)
            .with_context(|| format!("opening log file {}", logging.file))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Arc::new(file))
            .init();
    }
    Ok(())
}
