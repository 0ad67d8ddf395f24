use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cli::{Cli, Commands};
use netbear::discover::{BrowserPageFetcher, HttpPageFetcher, PageFetcher};
use netbear::engine::session::Session;
use netbear::http_client::ClientOptions;
use netbear::output::{print_summary, spawn_jsonl_writer, ObservationRecord};
use netbear::probe::http_probe::ReqwestHttp;
use netbear::probe::{Credentials, HttpCapability, ProbeContext};
use netbear::{Engine, EngineError, NetbearConfig, ScopeMatcher, SessionOutput, TargetDefinition, TestKind};

const PASSWORD_ENV: &str = "NETBEAR_PASSWORD";

pub async fn run_from_cli(cli: Cli) -> anyhow::Result<()> {
    // Our crate at the requested level, HTTP and browser internals kept quiet.
    use tracing_subscriber::EnvFilter;
    let crate_level = if cli.debug { "debug" } else if cli.verbose { "info" } else { "warn" };
    let filter_str = format!(
        "netbear={crate},reqwest=info,hyper=info,h2=info,chromiumoxide=warn",
        crate = crate_level
    );
    let env_filter = EnvFilter::try_new(&filter_str).unwrap_or_else(|_| EnvFilter::new(crate_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(true)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Crawl { targets, scopes, config, browser, browser_wait, out } => {
            run_crawl(targets, scopes, config, browser, browser_wait, out).await
        }
        Commands::Enumerate { host, username, tests, scopes, config, seed, out } => {
            run_enumerate(host, username, tests, scopes, config, seed, out).await
        }
    }
}

fn load_config(path: Option<&str>) -> anyhow::Result<NetbearConfig> {
    match path {
        Some(p) => Ok(NetbearConfig::load(Path::new(p))?),
        None => Ok(NetbearConfig::default()),
    }
}

fn http_for(config: &NetbearConfig) -> anyhow::Result<Arc<dyn HttpCapability>> {
    let opts = ClientOptions {
        timeout: config.timeout(),
        verify_ssl: config.verify_ssl,
        ..Default::default()
    };
    Ok(Arc::new(ReqwestHttp::new(opts)?))
}

async fn run_crawl(
    targets: String,
    scopes: String,
    config: Option<String>,
    browser: bool,
    browser_wait: u64,
    out: String,
) -> anyhow::Result<()> {
    let config = load_config(config.as_deref())?;
    let seeds = netbear::utils::load_targets(Path::new(&targets))?;
    let scope = netbear::utils::load_scope_rules(Path::new(&scopes))?;
    anyhow::ensure!(!seeds.is_empty(), "no targets in {targets}");

    let http = http_for(&config)?;
    let pages: Arc<dyn PageFetcher> = if browser {
        Arc::new(BrowserPageFetcher::launch(Duration::from_millis(browser_wait)).await?)
    } else {
        Arc::new(HttpPageFetcher::new(Credentials::none()))
    };
    let ctx = ProbeContext {
        http,
        pages,
        credentials: Credentials::none(),
        max_links_per_page: config.max_links_per_page,
        max_scripts_per_page: config.max_scripts_per_page,
    };

    println!("[>] Seeds: {} ({} scope rules)", seeds.len(), scope.len());
    println!("[~] Depth {} / {} pages per domain / {} workers", config.max_depth, config.max_pages_per_domain, config.max_workers);
    println!("\n{}\n", "-".repeat(60));

    let engine = Engine::new(config, scope, ctx)?;
    execute(engine, PathBuf::from(out), |engine, session| async move {
        engine.crawl(session, &seeds).await
    })
    .await
}

#[allow(clippy::too_many_arguments)]
async fn run_enumerate(
    host: String,
    username: String,
    tests: String,
    scopes: Option<String>,
    config: Option<String>,
    seed: Option<u64>,
    out: String,
) -> anyhow::Result<()> {
    let mut config = load_config(config.as_deref())?;
    if seed.is_some() {
        config.seed = seed;
    }

    let raw = if host.contains("://") { host.clone() } else { format!("https://{host}") };
    let base = Url::parse(&raw).with_context(|| format!("invalid host URL: {host}"))?;
    let scope = match &scopes {
        Some(p) => netbear::utils::load_scope_rules(Path::new(p))?,
        None => ScopeMatcher::from_patterns(base.host_str()),
    };
    let tests = tests
        .split(',')
        .filter(|t| !t.trim().is_empty())
        .map(str::parse::<TestKind>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(anyhow::Error::msg)?;
    let password = std::env::var(PASSWORD_ENV).with_context(|| format!("{PASSWORD_ENV} must be set"))?;
    let credentials = Credentials::basic(&username, &password);

    let target = TargetDefinition::nextcloud(base, &username, &config)?;
    let http = http_for(&config)?;
    let ctx = ProbeContext {
        http,
        pages: Arc::new(HttpPageFetcher::new(credentials.clone())),
        credentials,
        max_links_per_page: config.max_links_per_page,
        max_scripts_per_page: config.max_scripts_per_page,
    };

    println!("[>] Target: {} as {}", target.base_url, username);
    println!("[~] Tests: {}", tests.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "));
    println!("\n{}\n", "-".repeat(60));

    let engine = Engine::new(config, scope, ctx)?;
    execute(engine, PathBuf::from(out), |engine, session| async move {
        engine.enumerate(session, &tests, &target).await
    })
    .await
}

/// Wires Ctrl-C, the observation log and the progress spinner around one
/// session, then writes the report.
async fn execute<F, Fut>(engine: Engine, out_dir: PathBuf, run: F) -> anyhow::Result<()>
where
    F: FnOnce(Arc<Engine>, Arc<Session>) -> Fut,
    Fut: Future<Output = Result<SessionOutput, EngineError>>,
{
    let cancel = CancellationToken::new();
    let session = engine.new_session();
    let session_dir = out_dir.join(&session.id);
    netbear::utils::ensure_dir(&session_dir)?;

    let (tx, rx) = mpsc::channel::<ObservationRecord>(256);
    let writer = spawn_jsonl_writer(session_dir.join("observations.jsonl"), rx);
    let engine = Arc::new(engine.with_cancel(cancel.clone()).with_observation_sink(tx));

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n[!] Interrupted, finishing in-flight probes...");
            interrupt.cancel();
        }
    });

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    let ticker = {
        let progress = progress.clone();
        let stats = session.stats.clone();
        tokio::spawn(async move {
            loop {
                let s = stats.snapshot();
                progress.set_message(format!(
                    "{} tried, {} observed, {} failed, {} throttled",
                    s.candidates_tried,
                    s.observations,
                    s.network_failures + s.tls_failures + s.logic_failures,
                    s.throttled
                ));
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        })
    };

    let result = run(engine.clone(), session).await;
    ticker.abort();
    progress.finish_and_clear();

    // Closing the last sender lets the writer flush and exit.
    drop(engine);
    let written = writer.await.unwrap_or(0);
    tracing::info!(written, dir = %session_dir.display(), "observation log closed");

    let output = match result {
        Ok(output) => output,
        Err(EngineError::SessionFatal { reason }) => anyhow::bail!("session aborted: {reason}"),
        Err(e) => return Err(e.into()),
    };
    if cancel.is_cancelled() {
        println!("[!] Partial results (session was cancelled)");
    }

    let path = output.report.write_to(&session_dir)?;
    print_summary(&output.report, &output.stats);
    println!("[+] Report: {}", path.display());
    println!("[+] Observations: {}", session_dir.join("observations.jsonl").display());
    Ok(())
}
