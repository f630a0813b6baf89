use std::sync::Arc;
use std::time::Duration;

use recon_sync::config::{BackendOverrides, LoaderOverrides};
use recon_sync::{ConfigOverrides, DatasetKind, DatasetStore, HttpPageFetcher, LoadState, SyncConfig};
use tokio::task::JoinSet;
use tracing::{info, warn};

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    eprintln!(
        r#"recon-sync - load every result collection of a reconciliation job

USAGE:
    recon-sync --job <ID> [OPTIONS]

OPTIONS:
    -j, --job <ID>          Reconciliation job id (required)
    -c, --config <FILE>     Path to config file (TOML)
    -u, --base-url <URL>    Override backend base URL [default: http://127.0.0.1:8080/api]
        --page-size <N>     Override items per backend page [default: 5000]
        --timeout <SECS>    Override per-request timeout [default: 30]
    -s, --search <TERM>     Report how many rows of each collection match TERM
    -h, --help              Print help

ENVIRONMENT:
    RECON_SYNC_CONFIG               Path to config file
    RECON_SYNC_BACKEND__BASE_URL    Backend base URL
    RECON_SYNC_LOADER__PAGE_SIZE    Items per backend page

CONFIG FILE (recon-sync.toml):
    [backend]
    base_url = "https://recon.internal/api"

    [loader]
    page_size = 5000
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt::init();

    let Some(job_id) = parse_arg("--job").or_else(|| parse_arg("-j")) else {
        print_help();
        anyhow::bail!("missing --job");
    };

    // Build CLI overrides
    let mut overrides = ConfigOverrides::default();
    let mut backend_overrides = BackendOverrides::default();
    let mut loader_overrides = LoaderOverrides::default();

    if let Some(url) = parse_arg("--base-url").or_else(|| parse_arg("-u")) {
        backend_overrides.base_url = Some(url);
    }
    if let Some(timeout) = parse_arg("--timeout") {
        backend_overrides.request_timeout_secs = Some(timeout.parse()?);
    }
    if let Some(page_size) = parse_arg("--page-size") {
        loader_overrides.page_size = Some(page_size.parse()?);
    }
    if backend_overrides.base_url.is_some() || backend_overrides.request_timeout_secs.is_some() {
        overrides.backend = Some(backend_overrides);
    }
    if loader_overrides.page_size.is_some() {
        overrides.loader = Some(loader_overrides);
    }

    // Load config: CLI > Env > File > Defaults
    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("RECON_SYNC_CONFIG").ok());
    let config = SyncConfig::load(config_path.as_deref(), overrides)?;

    let fetcher = Arc::new(HttpPageFetcher::new(&config.backend)?);
    let store = DatasetStore::new(job_id.clone(), fetcher, &config);
    info!(job_id = %job_id, base_url = %config.backend.base_url, "loading job results");

    let mut loads = JoinSet::new();
    for kind in DatasetKind::ALL {
        let store = store.clone();
        loads.spawn(async move { (kind, store.activate(kind).await) });
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut failures = 0usize;
    loop {
        tokio::select! {
            joined = loads.join_next() => {
                let Some(joined) = joined else { break };
                let (kind, outcome) = joined?;
                if let Err(err) = outcome {
                    warn!(%kind, error = %err, "collection unavailable");
                    failures += 1;
                }
            }
            _ = ticker.tick() => {
                for kind in DatasetKind::ALL {
                    if store.load_state(kind) == LoadState::Loading {
                        let progress = store.progress_of(kind);
                        info!(%kind, current = progress.current, total = progress.total, percentage = progress.percentage, "loading");
                    }
                }
            }
        }
    }

    let search = parse_arg("--search").or_else(|| parse_arg("-s"));
    println!("job {job_id}");
    for kind in DatasetKind::ALL {
        let loaded = store.rows(kind).len();
        match (store.load_state(kind), &search) {
            (LoadState::Failed(err), _) => println!("  {kind:<14} failed: {err}"),
            (_, Some(term)) => {
                let matching = store.search(kind, term);
                println!("  {kind:<14} {loaded:>8} rows, {matching} matching {term:?}");
            }
            (_, None) => println!("  {kind:<14} {loaded:>8} rows"),
        }
    }

    let totals = store.volume_totals();
    println!("total volume {:.2}", totals.grand_total);

    let summary = store.summary_rows();
    if !summary.is_empty() {
        println!();
        println!("{:<24} {:<20} {:<8} {:>8} {:>16}", "agency", "service", "country", "count", "volume");
        for row in summary.iter() {
            println!(
                "{:<24} {:<20} {:<8} {:>8} {:>16.2}",
                row.agency, row.service, row.country, row.record_count, row.total_volume
            );
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} collection(s) failed to load");
    }
    Ok(())
}
