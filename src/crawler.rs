use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{Settings, SourceDescriptor};
use crate::error::FetchError;
use crate::fetch::Fetcher;
use crate::links;

/// One page body that passed the relevance gate.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    /// (source, seed, candidate) where candidate 0 is the seed page itself.
    pub order: (usize, usize, usize),
    pub source: usize,
    pub url: String,
    pub html: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub ok: usize,
    pub errors: usize,
    pub irrelevant: usize,
    pub deadline_hit: bool,
}

#[derive(Debug)]
enum PageEvent {
    Fetched(FetchedPage),
    Failed(FetchError),
}

struct Seed {
    source: usize,
    index: usize,
    url: Url,
}

/// Crawl every seed and its same-domain links. Hosts run concurrently up to
/// `settings.concurrency`; each host is fetched one page at a time with
/// `settings.delay_ms` in between. Returned pages are in (source, seed,
/// candidate) order regardless of completion order.
pub async fn crawl(
    sources: &[SourceDescriptor],
    fetcher: Arc<dyn Fetcher>,
    settings: &Settings,
) -> (Vec<FetchedPage>, CrawlStats) {
    let mut stats = CrawlStats::default();
    let mut hosts: BTreeMap<String, Vec<Seed>> = BTreeMap::new();

    for (source, descriptor) in sources.iter().enumerate() {
        for (index, raw) in descriptor.urls().enumerate() {
            match Url::parse(raw) {
                Ok(url) if url.host_str().is_some() => {
                    let host = url.host_str().unwrap_or_default().to_lowercase();
                    hosts.entry(host).or_default().push(Seed { source, index, url });
                }
                _ => {
                    warn!(oem = %descriptor.oem, url = raw, "Invalid start URL, skipping");
                    stats.errors += 1;
                }
            }
        }
    }

    info!("Crawling {} hosts", hosts.len());

    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let (tx, rx) = mpsc::channel::<PageEvent>(settings.concurrency.max(1) * 4);
    let mut tasks = JoinSet::new();

    for (host, seeds) in hosts {
        let fetcher = Arc::clone(&fetcher);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let delay = Duration::from_millis(settings.delay_ms);
        let max_links = settings.max_links;

        tasks.spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else { return };
            debug!(host = %host, seeds = seeds.len(), "Host started");
            crawl_host(seeds, fetcher.as_ref(), delay, max_links, &tx).await;
        });
    }

    // Drop our copy of tx so rx closes when all host tasks finish
    drop(tx);

    let keywords: Vec<String> = settings
        .relevance_keywords
        .iter()
        .map(|k| k.to_lowercase())
        .collect();
    let deadline = settings
        .deadline_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    let (pages, collected) = collect(rx, deadline, &keywords).await;
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}

    stats.ok += collected.ok;
    stats.errors += collected.errors;
    stats.irrelevant += collected.irrelevant;
    stats.deadline_hit = collected.deadline_hit;
    info!(
        "Crawled {} pages ({} ok, {} errors, {} irrelevant)",
        stats.ok + stats.errors,
        stats.ok,
        stats.errors,
        stats.irrelevant
    );
    (pages, stats)
}

/// Receive until every host task is done or the deadline passes. Events
/// already buffered when the deadline fires are still taken.
async fn collect(
    mut rx: mpsc::Receiver<PageEvent>,
    deadline: Option<Instant>,
    keywords: &[String],
) -> (Vec<FetchedPage>, CrawlStats) {
    let mut stats = CrawlStats::default();
    let mut pages = Vec::new();

    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} pages ({per_sec}) {msg}")
    {
        pb.set_style(style);
    }

    loop {
        let event = match deadline {
            Some(at) => match tokio::time::timeout_at(at, rx.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    warn!("Run deadline reached, abandoning outstanding fetches");
                    stats.deadline_hit = true;
                    while let Ok(event) = rx.try_recv() {
                        absorb(event, keywords, &mut pages, &mut stats);
                    }
                    break;
                }
            },
            None => rx.recv().await,
        };
        let Some(event) = event else { break };
        absorb(event, keywords, &mut pages, &mut stats);
        pb.inc(1);
        pb.set_message(format!("{} errors", stats.errors));
    }
    pb.finish_and_clear();

    pages.sort_by_key(|p| p.order);
    (pages, stats)
}

fn absorb(
    event: PageEvent,
    keywords: &[String],
    pages: &mut Vec<FetchedPage>,
    stats: &mut CrawlStats,
) {
    match event {
        PageEvent::Fetched(page) => {
            stats.ok += 1;
            if is_relevant(&page.html, keywords) {
                pages.push(page);
            } else {
                debug!(url = %page.url, "No relevance keyword, skipping");
                stats.irrelevant += 1;
            }
        }
        PageEvent::Failed(e) => {
            warn!("{}", e);
            stats.errors += 1;
        }
    }
}

/// One host's fetch state. Bodies are cached so sources sharing the host
/// never request a page twice, yet each source still gets every page it asks
/// for.
struct HostSession<'a> {
    fetcher: &'a dyn Fetcher,
    delay: Duration,
    bodies: HashMap<Url, Option<String>>,
    first: bool,
}

impl HostSession<'_> {
    /// `None` when the page failed; the failure is reported once.
    async fn get(&mut self, url: &Url, tx: &mpsc::Sender<PageEvent>) -> Option<String> {
        if let Some(body) = self.bodies.get(url) {
            return body.clone();
        }
        pace(&mut self.first, self.delay).await;
        let body = match self.fetcher.fetch(url.as_str()).await {
            Ok(html) => Some(html),
            Err(e) => {
                let _ = tx.send(PageEvent::Failed(e)).await;
                None
            }
        };
        self.bodies.insert(url.clone(), body.clone());
        body
    }
}

async fn crawl_host(
    seeds: Vec<Seed>,
    fetcher: &dyn Fetcher,
    delay: Duration,
    max_links: usize,
    tx: &mpsc::Sender<PageEvent>,
) {
    let mut session = HostSession {
        fetcher,
        delay,
        bodies: HashMap::new(),
        first: true,
    };

    for seed in seeds {
        let Some(html) = session.get(&seed.url, tx).await else { continue };
        let candidates = links::discover(&seed.url, &html, max_links);
        if !emit(tx, &seed, 0, &seed.url, html).await {
            return;
        }

        for (i, link) in candidates.iter().enumerate() {
            let Some(html) = session.get(link, tx).await else { continue };
            if !emit(tx, &seed, i + 1, link, html).await {
                return;
            }
        }
    }
}

/// False once the collector has gone away.
async fn emit(
    tx: &mpsc::Sender<PageEvent>,
    seed: &Seed,
    candidate: usize,
    url: &Url,
    html: String,
) -> bool {
    let page = FetchedPage {
        order: (seed.source, seed.index, candidate),
        source: seed.source,
        url: url.to_string(),
        html,
    };
    tx.send(PageEvent::Fetched(page)).await.is_ok()
}

/// Politeness delay between consecutive fetches on one host.
async fn pace(first: &mut bool, delay: Duration) {
    if !*first && !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    *first = false;
}

fn is_relevant(html: &str, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let low = html.to_lowercase();
    keywords.iter().any(|k| low.contains(k.as_str()))
}

// ── Tests ──
