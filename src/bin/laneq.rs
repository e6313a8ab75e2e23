//! laneq CLI: API server, worker, and operator commands.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use laneq::admission::{Admission, SubmitOutcome, SubmitRequest};
use laneq::broker::Broker;
use laneq::broker::memory::MemoryBroker;
use laneq::cancel::{CancelCoordinator, CancelOutcome};
use laneq::config::Config;
use laneq::config::secrets::ExposeSecret;
use laneq::db::Db;
use laneq::http::{AppState, build_router};
use laneq::lanes::QueueAdmin;
use laneq::registry::Registry;
use laneq::task::TaskCatalog;
use laneq::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
use laneq::worker::{Worker, WorkerConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "laneq", about = "Background jobs with idempotent submission")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve,
    /// Run a worker that drains the high lane before default
    Worker {
        /// Jobs run concurrently
        #[arg(long, default_value_t = 2)]
        concurrency: usize,
    },
    /// Run API and worker in one process on the in-memory broker
    Dev {
        #[arg(long, default_value_t = 2)]
        concurrency: usize,
    },
    /// Submit a job
    Submit {
        /// Registered task name (e.g. long_task, task_a)
        task: String,
        /// JSON arguments
        #[arg(long)]
        payload: Option<String>,
        /// Route to the high lane
        #[arg(long)]
        high: bool,
        /// Always create a new job, even if a live duplicate exists
        #[arg(long)]
        no_dedup: bool,
    },
    /// Show a job record
    Show {
        /// Job ID
        id: String,
    },
    /// Request cancellation of a job
    Cancel {
        /// Job ID
        id: String,
    },
    /// Pending counts per lane
    Queues,
    /// Drop every waiting entry in a lane
    Purge {
        /// Lane name: high or default
        lane: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve => {
            let _guard = telemetry(&config)?;
            let broker = connect(&config).await?;
            serve(&config, broker.clone(), Arc::new(TaskCatalog::builtin())).await?;
            broker.close().await;
            Ok(())
        }
        Command::Worker { concurrency } => {
            let _guard = telemetry(&config)?;
            let broker = connect(&config).await?;
            let worker = Worker::new(
                &broker,
                Arc::new(TaskCatalog::builtin()),
                config.jobs.clone(),
                WorkerConfig {
                    concurrency,
                    ..WorkerConfig::default()
                },
            );
            let w = worker.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                w.shutdown();
            });
            worker.run().await?;
            broker.close().await;
            Ok(())
        }
        Command::Dev { concurrency } => {
            let _guard = telemetry(&config)?;
            let broker = Broker::shared(Arc::new(MemoryBroker::new()));
            let catalog = Arc::new(TaskCatalog::builtin());
            let worker = Worker::new(
                &broker,
                Arc::clone(&catalog),
                config.jobs.clone(),
                WorkerConfig {
                    concurrency,
                    ..WorkerConfig::default()
                },
            );
            let w = worker.clone();
            let running = tokio::spawn(async move { w.run().await });
            serve(&config, broker, catalog).await?;
            worker.shutdown();
            running.await??;
            Ok(())
        }
        Command::Submit {
            task,
            payload,
            high,
            no_dedup,
        } => {
            let broker = connect(&config).await?;
            let payload: serde_json::Value = match payload {
                Some(json) => serde_json::from_str(&json)?,
                None => serde_json::json!({}),
            };
            let mut request = SubmitRequest::new(task, payload).high(high);
            if no_dedup {
                request = request.without_dedup();
            }
            let admission = Admission::new(
                &broker,
                Arc::new(TaskCatalog::builtin()),
                config.jobs.clone(),
            );
            match admission.submit(request).await? {
                SubmitOutcome::Created { job_id, lane } => {
                    println!("Created: {job_id} (lane: {lane})");
                }
                SubmitOutcome::Duplicate { job_id } => {
                    println!("Duplicate of live job {job_id}");
                }
            }
            broker.close().await;
            Ok(())
        }
        Command::Show { id } => {
            let broker = connect(&config).await?;
            let registry = Registry::new(Arc::clone(&broker.store), config.jobs.clone());
            let job = registry.get(id.parse()?).await?;
            println!("ID:         {}", job.id);
            println!("Task:       {}", job.task_name);
            println!("Lane:       {}", job.lane);
            println!("Status:     {}", job.status);
            if let Some(progress) = job.progress {
                println!("Progress:   {}/{}", progress.current, progress.total);
            }
            println!("Payload:    {}", serde_json::to_string_pretty(&job.payload)?);
            println!("Created:    {}", job.created_at);
            if let Some(started) = job.started_at {
                println!("Started:    {started}");
            }
            if let Some(ended) = job.ended_at {
                println!("Ended:      {ended}");
            }
            if let Some(ref result) = job.result {
                println!("Result:     {}", serde_json::to_string_pretty(result)?);
            }
            if let Some(ref err) = job.error {
                println!("Error:      [{:?}] {}", err.kind, err.message);
            }
            broker.close().await;
            Ok(())
        }
        Command::Cancel { id } => {
            let broker = connect(&config).await?;
            let registry = Registry::new(Arc::clone(&broker.store), config.jobs.clone());
            let cancel = CancelCoordinator::new(Arc::clone(&broker.store), registry);
            match cancel.request_cancel(id.parse()?).await? {
                CancelOutcome::Accepted => println!("Cancellation requested for {id}"),
                CancelOutcome::NotFound => anyhow::bail!("no job {id}"),
                CancelOutcome::AlreadyTerminal => anyhow::bail!("job {id} already ended"),
            }
            broker.close().await;
            Ok(())
        }
        Command::Queues => {
            let broker = connect(&config).await?;
            let admin = QueueAdmin::new(&broker, config.jobs.clone());
            println!("{:<10}  PENDING", "LANE");
            for count in admin.list_lanes().await? {
                println!("{:<10}  {}", count.lane, count.pending);
            }
            broker.close().await;
            Ok(())
        }
        Command::Purge { lane } => {
            let broker = connect(&config).await?;
            let admin = QueueAdmin::new(&broker, config.jobs.clone());
            let report = admin.purge(&lane).await?;
            println!("Purged {} job(s) from {}", report.purged, report.lane);
            broker.close().await;
            Ok(())
        }
    }
}

fn telemetry(config: &Config) -> anyhow::Result<TelemetryGuard> {
    Ok(init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "laneq".to_string(),
        default_filter: config.log_level.clone(),
    })?)
}

/// Open the Postgres broker, applying migrations and creating the lanes.
async fn connect(config: &Config) -> anyhow::Result<Broker> {
    let url = config.require_database_url()?;
    // A popped message must stay hidden for as long as its job may run.
    let visibility = config.jobs.task_timeout + config.jobs.idempotency_margin;
    let db = Db::connect(url.expose_secret(), visibility).await?;
    db.migrate().await?;
    db.create_lanes().await?;
    Ok(Broker::shared(Arc::new(db)))
}

async fn serve(config: &Config, broker: Broker, catalog: Arc<TaskCatalog>) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(broker, catalog, config.jobs.clone()));
    let app = build_router(state);
    let addr: SocketAddr = format!("{}:{}", config.api_host, config.api_port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "api listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;
    Ok(())
}
