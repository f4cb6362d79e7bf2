use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use smartmoney_core::config::Settings;
use smartmoney_core::ingest::fixture::FixtureProvider;
use smartmoney_core::ingest::provider::HttpJsonDataProvider;
use smartmoney_core::llm::anthropic::AnthropicThesisClient;
use smartmoney_core::llm::{DisabledThesisProvider, ThesisProvider};
use smartmoney_core::pipeline::{Collaborators, Coordinator, PipelineOptions};
use smartmoney_core::report::MarkdownReportRenderer;
use smartmoney_core::scoring::ScoringConfig;
use smartmoney_core::storage::file::JsonFileHistoryBackend;
use smartmoney_core::storage::history::{HistoryBackend, HistoryStore};
use smartmoney_core::storage::lock::{release_history_lock, try_acquire_history_lock, FileRunLock};
use smartmoney_core::storage::postgres::PgHistoryBackend;
use smartmoney_core::universe::EligibilityGate;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "smartmoney_worker")]
struct Args {
    /// Comma-separated symbols to screen.
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,

    /// File with one symbol per line (`#` starts a comment).
    #[arg(long)]
    universe_file: Option<PathBuf>,

    /// Serve every collaborator from a JSON fixture instead of the network.
    #[arg(long)]
    fixture: Option<PathBuf>,

    /// Run as of this instant (RFC 3339). Defaults to now.
    #[arg(long)]
    now: Option<String>,

    /// History file, used when DATABASE_URL is not set.
    #[arg(long, default_value = "data/recommendation_history.json")]
    history_file: PathBuf,

    #[arg(long, default_value = "reports")]
    report_dir: PathBuf,

    /// Run everything but neither persist history nor write the report.
    #[arg(long)]
    dry_run: bool,
}

enum RunLock {
    /// The advisory lock belongs to this session, so it stays checked out for the whole run.
    Postgres(sqlx::pool::PoolConnection<sqlx::Postgres>),
    File(FileRunLock),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    if let Err(err) = run(&args, &settings).await {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %format!("{err:#}"), "screening run failed");
        return Err(err);
    }
    Ok(())
}

async fn run(args: &Args, settings: &Settings) -> anyhow::Result<()> {
    let now = resolve_now(args.now.as_deref())?;
    let scoring = ScoringConfig::from_env()?;
    let gate = EligibilityGate::from_env()?;
    let options = PipelineOptions::from_env()?;

    let fixture = args
        .fixture
        .as_deref()
        .map(FixtureProvider::load)
        .transpose()?
        .map(Arc::new);

    let universe = load_universe(args, fixture.as_deref())?;
    anyhow::ensure!(
        !universe.is_empty(),
        "empty universe: pass --symbols, --universe-file or --fixture"
    );

    let collaborators = match &fixture {
        Some(f) => Collaborators {
            market: f.clone(),
            insider: f.clone(),
            superinvestor: f.clone(),
            thesis: f.clone(),
        },
        None => {
            let http = Arc::new(HttpJsonDataProvider::from_settings(settings)?);
            Collaborators {
                market: http.clone(),
                insider: http.clone(),
                superinvestor: http,
                thesis: thesis_provider(settings)?,
            }
        }
    };

    let (backend, lock): (Box<dyn HistoryBackend>, RunLock) = match settings.database_url.as_deref() {
        Some(db_url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(db_url)
                .await
                .context("connect DATABASE_URL failed")?;
            smartmoney_core::storage::migrate(&pool).await?;

            let mut lock_conn = pool
                .acquire()
                .await
                .context("acquire connection for history lock failed")?;
            let acquired = try_acquire_history_lock(&mut lock_conn).await?;
            if !acquired {
                tracing::warn!("history lock not acquired; another run in progress");
                return Ok(());
            }
            let backend: Box<dyn HistoryBackend> = Box::new(PgHistoryBackend::new(pool));
            (backend, RunLock::Postgres(lock_conn))
        }
        None => match FileRunLock::try_acquire(&args.history_file)? {
            Some(lock) => {
                let backend: Box<dyn HistoryBackend> =
                    Box::new(JsonFileHistoryBackend::new(&args.history_file));
                (backend, RunLock::File(lock))
            }
            None => {
                tracing::warn!(
                    lock = %FileRunLock::path_for(&args.history_file).display(),
                    "history lock held by another run"
                );
                return Ok(());
            }
        },
    };

    let coordinator = Coordinator::new(collaborators, scoring, gate, options);
    let result = screen(args, &coordinator, backend, &universe, now).await;

    match lock {
        RunLock::Postgres(mut conn) => match release_history_lock(&mut conn).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("history lock was not held at release"),
            Err(e) => tracing::warn!(error = %format!("{e:#}"), "failed to release history lock"),
        },
        RunLock::File(lock) => {
            tracing::debug!(lock = %lock.path().display(), "releasing run lock");
            drop(lock);
        }
    }

    result
}

async fn screen(
    args: &Args,
    coordinator: &Coordinator,
    backend: Box<dyn HistoryBackend>,
    universe: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let store = HistoryStore::load(backend, coordinator.options().cooldown()).await?;
    let report = coordinator.run(universe, &store, now).await;

    for rec in &report.recommendations {
        tracing::info!(
            rank = rec.rank,
            symbol = %rec.symbol,
            composite = rec.score.total,
            smart_money = rec.score.smart_money.total,
            ai = rec.score.ai,
            ai_available = rec.ai_available,
            quantitative = rec.score.quantitative.total,
            "recommendation"
        );
    }

    if args.dry_run {
        tracing::info!(
            dry_run = true,
            recommendations = report.recommendations.len(),
            "history not persisted, report not written"
        );
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    store
        .persist()
        .await
        .context("persist recommendation history failed")?;

    let renderer = MarkdownReportRenderer::new(&args.report_dir);
    coordinator.render(&renderer, &report).await;
    Ok(())
}

fn thesis_provider(settings: &Settings) -> anyhow::Result<Arc<dyn ThesisProvider>> {
    if settings.anthropic_api_key.is_some() {
        Ok(Arc::new(AnthropicThesisClient::from_settings(settings)?))
    } else {
        tracing::warn!("ANTHROPIC_API_KEY not set; AI theses will be reported unavailable");
        Ok(Arc::new(DisabledThesisProvider))
    }
}

fn load_universe(args: &Args, fixture: Option<&FixtureProvider>) -> anyhow::Result<Vec<String>> {
    let mut out = args.symbols.clone();
    if let Some(path) = args.universe_file.as_deref() {
        out.extend(read_universe_file(path)?);
    }
    if out.is_empty() {
        if let Some(f) = fixture {
            out = f.universe();
        }
    }
    Ok(out)
}

fn read_universe_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read universe file {}", path.display()))?;
    Ok(text
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

fn resolve_now(now_arg: Option<&str>) -> anyhow::Result<DateTime<Utc>> {
    match now_arg {
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("--now must be RFC 3339 (got {s:?})"))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}
