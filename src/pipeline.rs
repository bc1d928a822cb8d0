//! The scrape run: page loop, per-page stages and the final write.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::{Rng, rng};
use tokio::time::sleep;
use tracing::{debug, info};
use url::Url;

use crate::config::ScrapeConfig;
use crate::fetch::{PageFetcher, build_page_url, normalize_pager, origin_of};
use crate::listing::{AdCollection, PageYield};
use crate::locate::{PRERENDERED_STATE_MARKER, locate_bootstrap_script};
use crate::normalize::normalize_state;
use crate::output::write_ads;
use crate::sandbox::Sandbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Locate,
    Execute,
    Accumulate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Fetch => "fetch",
            Stage::Locate => "bootstrap script lookup",
            Stage::Execute => "sandbox execution",
            Stage::Accumulate => "ad extraction",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub pages: u32,
    pub ads: usize,
}

struct PageCtx {
    number: u32,
    url: Url,
}

/// Scrapes `first_page..=last_page` and writes every ad found to
/// `output_path`. Any stage failure aborts the run before anything is written.
pub async fn run(config: &ScrapeConfig) -> Result<RunSummary> {
    config.validate()?;

    let fetcher = PageFetcher::new(config)?;
    let sandbox = Sandbox::from_config(config)?;
    let (base, named_page) = normalize_pager(&config.base_url, &config.page_param);
    if let Some(p) = named_page {
        debug!(page = p, "ignoring page named in base_url, using configured range");
    }
    let origin = origin_of(&base);

    if config.respect_robots {
        fetcher
            .check_robots(&base)
            .await
            .context("robots.txt check failed")?;
    }

    info!(
        %base,
        first = config.first_page,
        last = config.last_page,
        "starting scrape"
    );

    let mut ads = AdCollection::new();
    let mut pages = 0u32;
    let mut referer = origin;

    for number in config.first_page..=config.last_page {
        let page = PageCtx {
            number,
            url: build_page_url(&base, &config.page_param, number),
        };
        pages += 1;

        let got = scrape_page(&fetcher, &sandbox, &page, &referer, &mut ads).await?;
        info!(
            page = number,
            url = %page.url,
            added = got.added,
            total = ads.len(),
            "page done"
        );

        if let Some(total_pages) = got.total_pages {
            if number >= total_pages {
                info!(page = number, total_pages, "last listing page reached");
                break;
            }
        }
        if got.added == 0 && config.stop_on_empty_page {
            info!(page = number, "page had no ads, stopping");
            break;
        }

        referer = page.url.to_string();
        if number < config.last_page {
            polite_delay(config).await;
        }
    }

    write_ads(&config.output_path, &ads).context("writing output failed")?;

    Ok(RunSummary {
        pages,
        ads: ads.len(),
    })
}

async fn scrape_page(
    fetcher: &PageFetcher,
    sandbox: &Sandbox,
    page: &PageCtx,
    referer: &str,
    ads: &mut AdCollection,
) -> Result<PageYield> {
    let n = page.number;
    let html = fetcher
        .fetch(&page.url, referer)
        .await
        .with_context(|| failed(n, Stage::Fetch))?;

    let script = locate_bootstrap_script(&html, PRERENDERED_STATE_MARKER)
        .with_context(|| failed(n, Stage::Locate))?;
    debug!(page = n, html_len = html.len(), script_len = script.len(), "bootstrap script found");

    let state = sandbox
        .execute(&script)
        .await
        .with_context(|| failed(n, Stage::Execute))?;
    let state = normalize_state(state);

    ads.extend_from_state(&state)
        .with_context(|| failed(n, Stage::Accumulate))
}

fn failed(page: u32, stage: Stage) -> String {
    format!("page {page}: {stage} failed")
}

async fn polite_delay(config: &ScrapeConfig) {
    if config.max_delay_ms == 0 {
        return;
    }
    let ms = rng().random_range(config.min_delay_ms..=config.max_delay_ms);
    sleep(Duration::from_millis(ms)).await;
}
