//! `channeld`: a long-running process that appends incoming events to a
//! durable event log, serves `/metrics` and `/healthz` over HTTP, and emits
//! periodic Merkle-root checkpoints for audit.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use channel_core::persist::PersistentEventStore;
use channel_core::reconstruct::{Projection, Reconstructor, SnapshotManager};
use channel_core::{receipts, EventStore};
use channel_spec::events::{Event, EventKind};
use channel_transport::{InVmQueue, Transport};
use clap::{Parser, Subcommand};
use prometheus::Encoder;
use serde::{Deserialize, Serialize};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Clone)]
struct DaemonMetrics {
    registry: prometheus::Registry,
    appends_total: prometheus::IntCounterVec,
    append_errors_total: prometheus::IntCounterVec,
    append_latency_ms: prometheus::HistogramVec,
    backlog_gauge: prometheus::IntGauge,
    disk_usage_bytes: prometheus::IntGauge,
}

impl DaemonMetrics {
    fn new() -> Self {
        let registry = prometheus::Registry::new();
        let appends_total = prometheus::IntCounterVec::new(
            prometheus::Opts::new("channeld_appends_total", "Total events appended"),
            &["domain"],
        )
        .unwrap();
        let append_errors_total = prometheus::IntCounterVec::new(
            prometheus::Opts::new("channeld_append_errors_total", "Append errors by domain"),
            &["domain"],
        )
        .unwrap();
        let append_latency_ms = prometheus::HistogramVec::new(
            prometheus::HistogramOpts::new(
                "channeld_append_latency_ms",
                "Append latency in milliseconds",
            ),
            &["domain"],
        )
        .unwrap();
        let backlog_gauge = prometheus::IntGauge::new(
            "channeld_backlog",
            "Pending events in the subscriber receive buffer",
        )
        .unwrap();
        let disk_usage_bytes = prometheus::IntGauge::new(
            "channeld_disk_usage_bytes",
            "Estimated disk usage of the event log",
        )
        .unwrap();

        registry
            .register(Box::new(appends_total.clone()))
            .expect("register appends_total");
        registry
            .register(Box::new(append_errors_total.clone()))
            .expect("register append_errors_total");
        registry
            .register(Box::new(append_latency_ms.clone()))
            .expect("register append_latency_ms");
        registry
            .register(Box::new(backlog_gauge.clone()))
            .expect("register backlog_gauge");
        registry
            .register(Box::new(disk_usage_bytes.clone()))
            .expect("register disk_usage_bytes");

        Self {
            registry,
            appends_total,
            append_errors_total,
            append_latency_ms,
            backlog_gauge,
            disk_usage_bytes,
        }
    }

    fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        let encoder = prometheus::TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[derive(Clone)]
struct StatusState {
    metrics: DaemonMetrics,
    store: Arc<dyn EventStore>,
    transport: Arc<InVmQueue>,
}

#[derive(Serialize)]
struct HealthReport {
    status: &'static str,
    backlog: i64,
    log_length: u64,
    disk_usage_bytes: u64,
}

#[derive(Deserialize)]
struct ReadQuery {
    #[serde(default)]
    offset: u64,
    #[serde(default = "default_read_limit")]
    limit: usize,
}

fn default_read_limit() -> usize {
    100
}

/// A lightweight per-domain tally, folded over the log to drive periodic
/// snapshots; not the objective-level projection `channel-cli` uses.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct DomainTally {
    objective: u64,
    channel: u64,
    chain: u64,
    message: u64,
}

impl Projection for DomainTally {
    fn apply(&mut self, event: &Event) {
        match &event.kind {
            EventKind::Objective(_) => self.objective += 1,
            EventKind::Channel(_) => self.channel += 1,
            EventKind::Chain(_) => self.chain += 1,
            EventKind::Message(_) => self.message += 1,
        }
    }
}

fn domain_label(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::Objective(_) => "objective",
        EventKind::Channel(_) => "channel",
        EventKind::Chain(_) => "chain",
        EventKind::Message(_) => "message",
    }
}

/// `channeld` command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase output verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Override log level (e.g. info, debug, trace).
    #[arg(long, env = "CHANNELD_LOG_LEVEL")]
    log_level: Option<String>,
    /// HTTP bind address for metrics and health endpoints.
    #[arg(
        long,
        env = "CHANNELD_STATUS_ADDR",
        default_value = "127.0.0.1:9090",
        help = "Bind address for /metrics and /healthz"
    )]
    status_addr: String,
    /// Directory holding the persistent event log.
    #[arg(long, env = "CHANNELD_DATA_DIR", default_value = "./channel-data")]
    data_dir: PathBuf,
    /// Subcommand.
    #[command(subcommand)]
    command: Commands,
}

/// Commands for `channeld`.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon: serve HTTP status and fold appended events.
    Daemon {
        /// Number of events between snapshot checkpoints.
        #[arg(short, long, default_value = "1000")]
        snapshot_interval: u64,
    },
    /// Append an event from a JSON file.
    Append {
        /// JSON file containing the event.
        #[arg(short, long)]
        file: String,
    },
    /// Read events.
    Read {
        /// Start offset.
        #[arg(short, long, default_value = "0")]
        offset: u64,
        /// Number of entries.
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = cli
        .log_level
        .as_deref()
        .map(|lvl| lvl.to_ascii_uppercase())
        .map(|lvl| match lvl.as_str() {
            "TRACE" => Level::TRACE,
            "DEBUG" => Level::DEBUG,
            "INFO" => Level::INFO,
            _ => Level::INFO,
        })
        .unwrap_or_else(|| match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        });
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let persistent = Arc::new(PersistentEventStore::open(&cli.data_dir)?);
    let store: Arc<dyn EventStore> = persistent.clone();

    match cli.command {
        Commands::Daemon { snapshot_interval } => {
            daemon(store, persistent, cli.status_addr, snapshot_interval).await
        }
        Commands::Append { file } => append_from_file(file, store).await,
        Commands::Read { offset, limit } => read_entries(offset, limit, store).await,
    }
}

async fn daemon(
    store: Arc<dyn EventStore>,
    persistent: Arc<PersistentEventStore>,
    status_addr: String,
    snapshot_interval: u64,
) -> anyhow::Result<()> {
    let metrics = DaemonMetrics::new();
    let transport = Arc::new(InVmQueue::with_store(store.clone()));
    let mut rx = transport.subscribe().await?;
    let snapshots: SnapshotManager = SnapshotManager::new();
    let mut last_snapshot_at = 0u64;

    metrics.disk_usage_bytes.set(persistent.storage_usage_bytes() as i64);

    let listener = tokio::net::TcpListener::bind(&status_addr).await?;
    let state = Arc::new(StatusState {
        metrics: metrics.clone(),
        store: store.clone(),
        transport: transport.clone(),
    });
    info!(addr = %status_addr, "status server listening");
    tokio::spawn(start_status_server(listener, state));

    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "status consumer lagged behind the event stream");
                continue;
            }
        };
        let span = tracing::info_span!("channeld_append", domain = domain_label(&event.kind));
        let _guard = span.enter();
        let label = domain_label(&event.kind);
        metrics.appends_total.with_label_values(&[label]).inc();

        let len = store.len();
        metrics.backlog_gauge.set(rx.len() as i64);
        metrics
            .disk_usage_bytes
            .set(persistent.storage_usage_bytes() as i64);
        info!(offset = len.saturating_sub(1), domain = label, "event appended");

        if len.saturating_sub(last_snapshot_at) >= snapshot_interval {
            let tally: DomainTally = Reconstructor::reconstruct(store.as_ref(), &snapshots, len)
                .unwrap_or_default();
            if snapshots.record(len, &tally).is_ok() {
                last_snapshot_at = len;
                if let Some(root) = receipts::root_for(store.as_ref()) {
                    info!(length = len, root = %root, "snapshot checkpoint");
                }
            }
        }
    }
    Ok(())
}

async fn append_from_file(path: String, store: Arc<dyn EventStore>) -> anyhow::Result<()> {
    let data = tokio::fs::read(&path).await?;
    let event: Event = serde_json::from_slice(&data)?;
    let offset = store.append(event)?;
    info!(offset, "appended event");
    Ok(())
}

async fn read_entries(offset: u64, limit: usize, store: Arc<dyn EventStore>) -> anyhow::Result<()> {
    let span = tracing::info_span!("channeld_read", offset, limit, latency_ms = tracing::field::Empty);
    let _guard = span.enter();
    let start = std::time::Instant::now();
    let events = store.read(offset, limit);
    let elapsed = start.elapsed().as_millis() as u64;
    span.record("latency_ms", elapsed);
    for event in events {
        println!(
            "id={} domain={} timestamp={}",
            event.id,
            domain_label(&event.kind),
            event.timestamp
        );
    }
    Ok(())
}

async fn start_status_server(listener: tokio::net::TcpListener, state: Arc<StatusState>) {
    let app = Router::new()
        .route("/metrics", get(metrics_endpoint))
        .route("/healthz", get(health_endpoint))
        .route("/events", get(read_events_endpoint).post(append_event_endpoint))
        .with_state(state);

    if let Err(err) = axum::serve(listener, app.into_make_service()).await {
        tracing::warn!(error = %err, "status server terminated");
    }
}

fn current_health(state: &StatusState) -> HealthReport {
    HealthReport {
        status: "ok",
        backlog: state.metrics.backlog_gauge.get(),
        log_length: state.store.len(),
        disk_usage_bytes: state.metrics.disk_usage_bytes.get() as u64,
    }
}

async fn metrics_endpoint(State(state): State<Arc<StatusState>>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn health_endpoint(State(state): State<Arc<StatusState>>) -> impl IntoResponse {
    Json(current_health(&state))
}

async fn read_events_endpoint(
    State(state): State<Arc<StatusState>>,
    Query(query): Query<ReadQuery>,
) -> impl IntoResponse {
    Json(state.store.read(query.offset, query.limit))
}

async fn append_event_endpoint(
    State(state): State<Arc<StatusState>>,
    Json(event): Json<Event>,
) -> impl IntoResponse {
    let label = domain_label(&event.kind);
    match state.transport.append(event).await {
        Ok(()) => (StatusCode::ACCEPTED, "accepted").into_response(),
        Err(err) => {
            state
                .metrics
                .append_errors_total
                .with_label_values(&[label])
                .inc();
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
    }
}
