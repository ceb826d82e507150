//! Exposes the command line application.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use pixcache_service::config::Config;
use pixcache_service::decode::ImageKind;
use pixcache_service::loader::{LoadRequest, LoadStatus, Loader};
use pixcache_service::metrics;
use pixcache_service::types::{ScopeKey, TargetSize};

use crate::logging;
use crate::slot::ConsoleSlot;

/// Pixcache commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Load images through the cache and report what each source resolved to.
    Load(LoadArgs),

    /// Prefetch resources into the download directory, without decoding them.
    Download {
        /// The resources to download.
        #[arg(required = true)]
        sources: Vec<String>,
    },

    /// Report whether a resource has been downloaded.
    Check {
        /// The resource to look up.
        source: String,
    },
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// The scope all images are loaded in.
    #[arg(long, default_value = "pixcache")]
    scope: String,

    /// Post-processing of the decoded images, e.g. `round:8` or `scale-to-width`.
    #[arg(long, default_value_t = ImageKind::Original)]
    kind: ImageKind,

    /// The width to decode into. Defaults to the configured display size.
    #[arg(long, requires = "height")]
    width: Option<u32>,

    /// The height to decode into. Defaults to the configured display size.
    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// How often to request all sources. Repeated requests are answered from the cache.
    #[arg(long, default_value_t = 2)]
    repeat: usize,

    /// How long to wait for a load to finish before giving up.
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// The resources to load, either URLs or local paths.
    #[arg(required = true)]
    sources: Vec<String>,
}

/// Command line interface parser.
#[derive(Parser, Debug)]
#[command(bin_name = "pixcache", version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: No threads have been spawned yet.
    unsafe { logging::init_logging(&config) };
    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();
        if let Some(tag) = config.metrics.hostname_tag.clone()
            && let Some(name) = hostname::get().ok().and_then(|s| s.into_string().ok())
        {
            tags.insert(tag, name);
        }
        metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags)?;
    }

    match cli.command {
        Command::Load(args) => load(&config, args),
        Command::Download { sources } => download(&config, &sources),
        Command::Check { source } => check(&config, &source),
    }
}

fn load(config: &Config, args: LoadArgs) -> Result<()> {
    let mut loader = Loader::new(config).context("failed to create the loader")?;
    let scope = ScopeKey::new(&args.scope);
    let size = match (args.width, args.height) {
        (Some(width), Some(height)) => Some(TargetSize::new(width, height)),
        _ => None,
    };

    let slots: Vec<_> = args
        .sources
        .iter()
        .map(|_| ConsoleSlot::new(size))
        .collect();

    for round in 1..=args.repeat.max(1) {
        let mut requested = Vec::with_capacity(slots.len());
        for (source, slot) in args.sources.iter().zip(&slots) {
            let request = LoadRequest::new(&scope, source).kind(args.kind);
            let status = loader.load(request, slot);
            tracing::debug!(round, %source, ?status, "Requested image");
            requested.push((status, slot.results()));
        }

        if !loader.run_until_idle(args.timeout) {
            bail!(
                "no load finished within {}, {} still in flight",
                humantime::format_duration(args.timeout),
                loader.in_flight()
            );
        }

        for ((source, slot), (status, results_before)) in
            args.sources.iter().zip(&slots).zip(requested)
        {
            let outcome = match status {
                LoadStatus::Loaded => "cached",
                LoadStatus::NotLoaded => "skipped",
                LoadStatus::Pending if slot.results() > results_before => "loaded",
                LoadStatus::Pending => "failed",
            };
            println!("{round:>3} {outcome:<8} {:>11} {source}", slot.shown());
        }
    }

    println!("{}", loader.cache());
    let stats = loader.executor_stats();
    tracing::debug!(
        workers = stats.workers,
        idle = stats.idle,
        queued = stats.queued,
        "Executor state after loading"
    );
    Ok(())
}

fn download(config: &Config, sources: &[String]) -> Result<()> {
    if config.downloads.cache_dir.is_none() {
        bail!("no download directory configured, set `downloads.cache_dir`");
    }
    let loader = Loader::new(config).context("failed to create the loader")?;

    let mut failed = 0;
    for source in sources {
        match loader.download(source) {
            Ok(Some(path)) => println!("{source}: {}", path.display()),
            Ok(None) => println!("{source}: not persisted"),
            Err(error) => {
                failed += 1;
                tracing::error!(
                    %source,
                    error = &error as &dyn std::error::Error,
                    "Failed to download"
                );
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} downloads failed", sources.len());
    }
    Ok(())
}

fn check(config: &Config, source: &str) -> Result<()> {
    let loader = Loader::new(config).context("failed to create the loader")?;
    if loader.has_download(source) {
        println!("{source}: downloaded");
    } else {
        println!("{source}: not downloaded");
    }
    Ok(())
}
