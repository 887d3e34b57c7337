use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use benchd::config::{BrokerConfig, WebConfig, WorkerConfig};
use benchd::error::Result;
use benchd::job::{JobParameters, JobStatus};
use benchd::reports::{
    create_data_table, write_report, Metric, ReportConfig, ReportSpec, Section,
};
use benchd::shutdown::install_shutdown_handler;
use benchd::web::{serve, WebState};
use benchd::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "benchd")]
#[command(about = "Distributed benchmark execution service")]
struct Cli {
    /// Broker URL: "mem:" or a filesystem path (overrides BENCHD_URL)
    #[arg(long)]
    url: Option<String>,

    /// Credentials file for external broker backends (overrides BENCHD_CREDS)
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Key namespace prefix (overrides BENCHD_NAMESPACE)
    #[arg(long)]
    namespace: Option<String>,

    /// Worker pool / submit queue name (overrides BENCHD_QUEUE)
    #[arg(long)]
    queue: Option<String>,

    #[command(subcommand)]
    command: Command,
}

fn parse_status(s: &str) -> std::result::Result<JobStatus, String> {
    JobStatus::parse(s).ok_or_else(|| format!("unknown status {s:?}"))
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a benchmark job
    Submit {
        /// Git remote URL to clone
        #[arg(long)]
        remote: String,

        /// Git ref to check out
        #[arg(long = "ref", default_value = "main")]
        git_ref: String,

        /// Benchmark name filter expression
        #[arg(long, default_value = ".*")]
        filter: String,

        /// Per-benchmark time budget in seconds
        #[arg(long, default_value_t = 1)]
        bench_time_secs: u64,

        /// Whole-job timeout in seconds, enforced by the stale reaper
        #[arg(long, default_value_t = 3600)]
        timeout_secs: u64,

        /// Free-form label shown in listings and reports
        #[arg(long, default_value = "")]
        label: String,

        /// Keep the scratch directory after the run
        #[arg(long)]
        skip_cleanup: bool,
    },
    /// Cancel a submitted job
    Cancel {
        id: Uuid,
    },
    /// List jobs
    List {
        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Oldest first instead of newest first
        #[arg(long)]
        asc: bool,

        /// Filter by status (repeatable); uses the KV snapshot listing
        #[arg(long = "status", value_parser = parse_status)]
        statuses: Vec<JobStatus>,
    },
    /// Render an HTML report over completed jobs
    Report {
        /// Report spec file (JSON); a default comparative layout otherwise
        #[arg(long)]
        spec: Option<PathBuf>,

        /// Output HTML file
        #[arg(long)]
        output: PathBuf,

        /// Report title for the default layout
        #[arg(long)]
        title: Option<String>,

        /// Job ids, in column order
        #[arg(required = true)]
        jobs: Vec<Uuid>,
    },
    /// Mark timed-out running jobs as failed
    FailStale,
    /// Run a worker loop
    Worker {
        #[arg(long)]
        scratch_root: Option<PathBuf>,

        #[arg(long, default_value_t = 15)]
        heartbeat_secs: u64,

        /// Worker identity; derived from the hostname by default
        #[arg(long)]
        id: Option<String>,
    },
    /// Run the read-only web surface
    Web {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

impl Cli {
    fn broker_config(&self) -> BrokerConfig {
        let mut cfg = BrokerConfig::from_env();
        if let Some(url) = &self.url {
            cfg.url = url.clone();
        }
        if let Some(creds) = &self.credentials {
            cfg.credentials = Some(creds.clone());
        }
        if let Some(ns) = &self.namespace {
            cfg.namespace = ns.clone();
        }
        if let Some(queue) = &self.queue {
            cfg.queue = queue.clone();
        }
        cfg
    }
}

async fn run(cli: Cli) -> Result<()> {
    let broker_cfg = cli.broker_config();
    let client = broker_cfg.client()?;

    match cli.command {
        Command::Submit {
            remote,
            git_ref,
            filter,
            bench_time_secs,
            timeout_secs,
            label,
            skip_cleanup,
        } => {
            let params = JobParameters {
                git_remote: remote,
                git_ref,
                tests_filter_expr: filter,
                bench_time: Duration::from_secs(bench_time_secs),
                skip_cleanup,
                timeout: Duration::from_secs(timeout_secs),
                label,
                worker_pool: String::new(),
            };
            let job = client.submit_job(params).await?;
            println!("{}", job.id);
        }
        Command::Cancel { id } => {
            client.cancel_job(id).await?;
            println!("Job {id} cancelled");
        }
        Command::List {
            limit,
            offset,
            asc,
            statuses,
        } => {
            let jobs = if statuses.is_empty() {
                client.load_jobs(limit, offset, asc).await?
            } else {
                let (jobs, counts) = client.load_jobs_by_kv(limit, offset, &statuses).await?;
                for (status, count) in &counts {
                    println!("# {status}: {count}");
                }
                jobs
            };
            for job in jobs {
                println!(
                    "{}  {:<9}  {}  {}  {}",
                    job.id,
                    job.status.to_string(),
                    job.created.format("%Y-%m-%d %H:%M:%S"),
                    job.parameters.git_ref,
                    job.parameters.label,
                );
            }
        }
        Command::Report {
            spec,
            output,
            title,
            jobs,
        } => {
            let mut cfg = ReportConfig::default();
            match spec {
                Some(path) => {
                    let spec = ReportSpec::load_file(path)?;
                    spec.configure_report(&mut cfg)?;
                }
                None => {
                    cfg.title = title.unwrap_or_else(|| "Benchmark report".to_string());
                    cfg.add_sections([
                        Section::jobs_table(),
                        Section::trend_chart("", Metric::TimeOp, ""),
                        Section::horizontal_bar_chart("", Metric::TimeOp, ""),
                        Section::results_table(Metric::TimeOp, "", true),
                        Section::horizontal_bar_chart("", Metric::Speed, ""),
                        Section::results_table(Metric::Speed, "", true),
                    ]);
                }
            }

            let table = create_data_table(&client, &jobs).await?;
            let mut file = std::fs::File::create(&output)?;
            write_report(&cfg, &table, &mut file)?;
            println!("Report written to {}", output.display());
        }
        Command::FailStale => {
            println!("Scanning for stale running jobs...");
            let updated = client.fail_stale_jobs().await?;
            println!("Marked {updated} stale jobs as failed");
        }
        Command::Worker {
            scratch_root,
            heartbeat_secs,
            id,
        } => {
            let mut cfg = WorkerConfig::default();
            if let Some(root) = scratch_root {
                cfg.scratch_root = root;
            }
            if let Some(id) = id {
                cfg.id = id;
            }
            cfg.heartbeat_interval = Duration::from_secs(heartbeat_secs.max(1));

            let shutdown = install_shutdown_handler("worker");
            let worker = Worker::new(client, cfg.id, cfg.scratch_root, shutdown)
                .with_heartbeat_interval(cfg.heartbeat_interval);
            worker.run().await?;
        }
        Command::Web { port } => {
            let mut cfg = WebConfig::default();
            cfg.listen_addr.set_port(port);

            let shutdown = install_shutdown_handler("web");
            let state = WebState {
                client: std::sync::Arc::new(client),
            };
            serve(cfg.listen_addr, state, shutdown).await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error ({}): {e}", e.kind());
        std::process::exit(1);
    }
}
