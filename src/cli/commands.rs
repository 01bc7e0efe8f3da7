//! CLI commands implementation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use crate::batch::Batcher;
use crate::channel::HttpChannelClient;
use crate::config::{load_settings_with_options, LoadOptions, Settings};
use crate::crawl::{GoogleSearchClient, PageCrawler};
use crate::provider::{BatchProvider, GeminiBatchClient};
use crate::queue::{connect_broker, Broker, QueueName, SearchTask, TaskMessage};
use crate::repository::{JobRepository, PostRepository};
use crate::server;
use crate::worker::Worker;

#[derive(Parser)]
#[command(name = "retriever")]
#[command(about = "Promotional-content retrieval and batch analysis pipeline")]
#[command(version)]
pub struct Cli {
    /// Data directory
    #[arg(long, global = true, env = "RETRIEVER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Config file path
    #[arg(long, global = true, env = "RETRIEVER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Search keywords and feed the results into the pipeline
    Search {
        /// Keywords to search for
        keywords: Vec<String>,
        /// Maximum results per keyword
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Run a worker consuming pipeline queues
    Worker {
        /// Queues to consume (default: all)
        #[arg(short, long, value_delimiter = ',')]
        queues: Vec<String>,
    },

    /// Run the periodic batch scheduler
    Scheduler,

    /// Run a single batch tick now
    Tick,

    /// Batch job operations
    Batch {
        #[command(subcommand)]
        command: BatchCommands,
    },

    /// Start the admin API server
    Serve {
        /// Address to bind to: PORT, HOST, or HOST:PORT
        #[arg(default_value = "127.0.0.1:8080")]
        bind: String,
    },

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum BatchCommands {
    /// Queue one post for registration
    Register {
        /// Post id to register
        post_id: String,
    },
    /// Register every eligible post now
    RegisterAll,
    /// Submit pending jobs now
    Submit,
    /// Poll submitted jobs now
    Poll,
    /// Download and apply processed jobs now
    Complete,
    /// Fail all non-completed jobs and start over
    Reset,
    /// Show the job-status histogram
    Stats,
}

/// Assembled repositories and components for one command.
struct AppContext {
    posts: Arc<PostRepository>,
    jobs: Arc<JobRepository>,
    broker: Arc<dyn Broker>,
    batcher: Arc<Batcher>,
}

async fn build_context(settings: &Settings) -> anyhow::Result<AppContext> {
    settings.ensure_directories()?;
    let provider: Arc<dyn BatchProvider> = Arc::new(
        GeminiBatchClient::from_env(settings.batch.provider_timeout())
            .context("set GEMINI_API_KEY to talk to the batch provider")?,
    );

    let db_path = settings.database_path();
    let store_timeout = settings.batch.store_timeout();
    let posts = Arc::new(PostRepository::new(&db_path, store_timeout)?);
    let jobs = Arc::new(JobRepository::new(&db_path, store_timeout)?);
    let broker = connect_broker(settings.broker_url.as_deref()).await?;
    let batcher = Arc::new(Batcher::new(
        Arc::clone(&posts),
        Arc::clone(&jobs),
        provider,
        Arc::clone(&broker),
        &settings.batch,
    ));
    batcher.accumulator.start()?;

    Ok(AppContext {
        posts,
        jobs,
        broker,
        batcher,
    })
}

fn build_worker(settings: &Settings, ctx: &AppContext) -> Worker {
    let crawler = PageCrawler::new(
        &settings.user_agent,
        std::time::Duration::from_secs(settings.request_timeout),
    );
    let mut worker = Worker::new(
        Arc::clone(&ctx.posts),
        Arc::clone(&ctx.broker),
        Arc::clone(&ctx.batcher),
        crawler,
    );

    match GoogleSearchClient::from_env(std::time::Duration::from_secs(settings.request_timeout)) {
        Ok(search) => worker = worker.with_search(search),
        Err(e) => tracing::debug!("Search client unavailable: {}", e),
    }
    if let Some(url) = &settings.channel_service_url {
        worker = worker.with_channel_client(Arc::new(HttpChannelClient::new(
            url,
            std::time::Duration::from_secs(settings.request_timeout),
        )));
    }
    worker
}

fn parse_queues(names: &[String]) -> anyhow::Result<Vec<QueueName>> {
    if names.is_empty() {
        return Ok(QueueName::ALL.to_vec());
    }
    names
        .iter()
        .map(|name| {
            QueueName::from_str(name).with_context(|| format!("unknown queue: {}", name))
        })
        .collect()
}

fn parse_bind(bind: &str) -> (String, u16) {
    if let Some((host, port)) = bind.rsplit_once(':') {
        if let Ok(port) = port.parse() {
            return (host.to_string(), port);
        }
    }
    if let Ok(port) = bind.parse() {
        return ("127.0.0.1".to_string(), port);
    }
    (bind.to_string(), 8080)
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (settings, _config) = load_settings_with_options(LoadOptions {
        config_path: cli.config.clone(),
        data_dir: cli.data_dir.clone(),
    })
    .await;

    match cli.command {
        Commands::Init => {
            settings.ensure_directories()?;
            let db_path = settings.database_path();
            let store_timeout = settings.batch.store_timeout();
            let _posts = PostRepository::new(&db_path, store_timeout)?;
            let jobs = JobRepository::new(&db_path, store_timeout)?;
            jobs.ensure_accepting()?;
            println!("Initialized database at {}", db_path.display());
        }

        Commands::Search { keywords, limit } => {
            anyhow::ensure!(!keywords.is_empty(), "provide at least one keyword");
            let ctx = build_context(&settings).await?;
            ctx.broker
                .publish(&TaskMessage::Search(SearchTask {
                    keywords: keywords.clone(),
                    limit,
                }))
                .await?;

            if settings.broker_url.is_some() {
                println!("Search task published for {} keywords", keywords.len());
            } else {
                // Without a broker the queues are in-process; run the
                // pipeline here until it drains.
                let worker = build_worker(&settings, &ctx);
                let processed = worker
                    .drain(&[QueueName::Search, QueueName::Crawl, QueueName::Analyze])
                    .await?;
                println!(
                    "Search pipeline finished, {} tasks processed, {} posts stored",
                    processed,
                    ctx.posts.count()?
                );
            }
        }

        Commands::Worker { queues } => {
            let queues = parse_queues(&queues)?;
            let ctx = build_context(&settings).await?;
            let worker = build_worker(&settings, &ctx);
            worker.run(&queues).await?;
        }

        Commands::Scheduler => {
            let ctx = build_context(&settings).await?;
            // With an external broker, only publish the periodic poll task;
            // the poll-queue worker runs the tick.
            let publish_beat = settings.broker_url.is_some();
            ctx.batcher.scheduler.run(publish_beat).await?;
        }

        Commands::Tick => {
            let ctx = build_context(&settings).await?;
            let report = ctx.batcher.scheduler.run_tick().await?;
            println!(
                "Tick finished: swept={:?}, submitted={}, polled={}, completed jobs={}, applied responses={}, fanned out={}",
                report.swept,
                report.submitted.len(),
                report.polled.len(),
                report.completion.completed_job_count,
                report.completion.completed_request_count,
                report.fanned_out
            );
        }

        Commands::Batch { command } => {
            let ctx = build_context(&settings).await?;
            match command {
                BatchCommands::Register { post_id } => {
                    anyhow::ensure!(
                        ctx.posts.get(&post_id)?.is_some(),
                        "no post with id {}",
                        post_id
                    );
                    ctx.broker
                        .publish(&TaskMessage::Analyze(crate::queue::AnalyzeTask {
                            post_id: post_id.clone(),
                        }))
                        .await?;
                    println!("Registration queued for post {}", post_id);
                }
                BatchCommands::RegisterAll => {
                    let registered = ctx.batcher.accumulator.register_all()?;
                    println!("Registered {} posts", registered);
                }
                BatchCommands::Submit => {
                    let submitted = ctx.batcher.submitter.submit_pending().await?;
                    println!("Submitted {} jobs: {:?}", submitted.len(), submitted);
                }
                BatchCommands::Poll => {
                    let polled = ctx.batcher.poller.poll_submitted().await?;
                    println!("Polled {} jobs: {:?}", polled.len(), polled);
                }
                BatchCommands::Complete => {
                    let report = ctx.batcher.completer.complete_processed().await?;
                    println!(
                        "Completed {} of {} processed jobs ({} responses applied)",
                        report.completed_job_count,
                        report.processed_job_count,
                        report.completed_request_count
                    );
                }
                BatchCommands::Reset => {
                    let failed = ctx.jobs.reset()?;
                    println!("Reset batch state, {} jobs failed", failed);
                }
                BatchCommands::Stats => {
                    let stats = ctx.jobs.statistics()?;
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                }
            }
        }

        Commands::Serve { bind } => {
            settings.ensure_directories()?;
            let provider: Arc<dyn BatchProvider> = Arc::new(
                GeminiBatchClient::from_env(settings.batch.provider_timeout())
                    .context("set GEMINI_API_KEY to talk to the batch provider")?,
            );
            let (host, port) = parse_bind(&bind);
            server::serve(&settings, provider, &host, port).await?;
        }

        Commands::Status => {
            let db_path = settings.database_path();
            if !settings.database_exists() {
                println!("No database at {} (run `retriever init` first)", db_path.display());
                return Ok(());
            }
            let store_timeout = settings.batch.store_timeout();
            let posts = PostRepository::new(&db_path, store_timeout)?;
            let jobs = JobRepository::new(&db_path, store_timeout)?;
            let stats = jobs.statistics()?;

            println!("Posts: {} total, {} analyzed", posts.count()?, posts.count_analyzed()?);
            println!("Jobs:");
            for (status, count) in &stats.job_status_counts {
                println!("  {:<10} {}", status, count);
            }
            println!(
                "Requests: {} pending, {} processed",
                stats.pending_requests, stats.processed_requests
            );
        }
    }

    Ok(())
}
