use std::path::PathBuf;

use adclaw::inspect::{self, SortKey};
use adclaw::sandbox::{self, ENGINE_SUBCOMMAND, EngineLimits};
use adclaw::{ScrapeConfig, pipeline};
use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

#[derive(Parser)]
#[command(name = "adclaw", version, about = "Scrape classifieds listing pages into a JSON file")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk listing pages and write every ad to one JSON file
    Scrape(ScrapeArgs),
    /// Search and sort a previously written ads file
    Inspect(InspectArgs),
    /// Runs one bootstrap script from stdin; spawned by `scrape`
    #[command(name = ENGINE_SUBCOMMAND, hide = true)]
    SandboxEngine(EngineArgs),
}

#[derive(Args)]
struct ScrapeArgs {
    /// TOML file with scrape settings
    #[arg(short, long, env = "ADCLAW_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "ADCLAW_BASE_URL")]
    base_url: Option<Url>,
    #[arg(long)]
    first_page: Option<u32>,
    #[arg(long)]
    last_page: Option<u32>,
    #[arg(short, long, env = "ADCLAW_OUTPUT")]
    output: Option<PathBuf>,
    #[arg(long)]
    retries: Option<u32>,
    #[arg(long)]
    sandbox_timeout_ms: Option<u64>,
    /// Skip the robots.txt check
    #[arg(long)]
    ignore_robots: bool,
    /// No delay between pages
    #[arg(long)]
    no_delay: bool,
    /// End the run at the first page without ads
    #[arg(long)]
    stop_on_empty_page: bool,
}

#[derive(Args)]
struct InspectArgs {
    file: PathBuf,
    /// Case-insensitive match on title or city
    #[arg(short, long)]
    search: Option<String>,
    /// default, price-low, price-high, date-new, date-old
    #[arg(long, default_value = "default")]
    sort: SortKey,
    #[arg(short = 'n', long)]
    limit: Option<usize>,
}

#[derive(Args)]
struct EngineArgs {
    #[arg(long)]
    loop_iteration_limit: u64,
    #[arg(long)]
    recursion_limit: usize,
}

impl ScrapeArgs {
    fn into_config(self) -> Result<ScrapeConfig> {
        let mut cfg = match &self.config {
            Some(path) => ScrapeConfig::from_file(path)?,
            None => ScrapeConfig::default(),
        };
        if let Some(u) = self.base_url {
            cfg.base_url = u;
        }
        if let Some(p) = self.first_page {
            cfg.first_page = p;
        }
        if let Some(p) = self.last_page {
            cfg.last_page = p;
        }
        if let Some(o) = self.output {
            cfg.output_path = o;
        }
        if let Some(r) = self.retries {
            cfg.retries = r;
        }
        if let Some(t) = self.sandbox_timeout_ms {
            cfg.sandbox_timeout_ms = t;
        }
        if self.ignore_robots {
            cfg.respect_robots = false;
        }
        if self.stop_on_empty_page {
            cfg.stop_on_empty_page = true;
        }
        if self.no_delay {
            cfg.min_delay_ms = 0;
            cfg.max_delay_ms = 0;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "adclaw=debug" } else { "adclaw=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Command::Scrape(args) => scrape(args).await,
        Command::Inspect(args) => {
            let ads = inspect::load_ads(&args.file)?;
            print!(
                "{}",
                inspect::render(&ads, args.search.as_deref(), args.sort, args.limit)
            );
            Ok(())
        }
        Command::SandboxEngine(args) => Ok(sandbox::serve_engine(EngineLimits {
            loop_iteration_limit: args.loop_iteration_limit,
            recursion_limit: args.recursion_limit,
        })?),
    }
}

async fn scrape(args: ScrapeArgs) -> Result<()> {
    let cfg = args.into_config().context("invalid configuration")?;

    let summary = tokio::select! {
        res = pipeline::run(&cfg) => res,
        _ = tokio::signal::ctrl_c() => bail!("interrupted, no output written"),
    };

    match summary {
        Ok(s) => {
            info!(
                pages = s.pages,
                ads = s.ads,
                output = %cfg.output_path.display(),
                "scrape finished"
            );
            Ok(())
        }
        Err(e) => {
            error!("scrape aborted: {e:#}");
            Err(e)
        }
    }
}
