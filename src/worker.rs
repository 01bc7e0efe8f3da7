//! Queue consumers for the pipeline stages.
//!
//! A worker subscribes to a set of queues and dispatches each task to its
//! stage handler. Run exactly one worker on the analyze and poll queues;
//! the other queues scale out freely.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::batch::Batcher;
use crate::channel::{handle_channel_task, ChannelClient};
use crate::crawl::{is_telegram_link, GoogleSearchClient, PageCrawler};
use crate::models::Post;
use crate::queue::{
    AnalyzeTask, Broker, ChannelTask, CrawlTask, QueueName, SearchTask, TaskMessage,
};
use crate::repository::PostRepository;

/// How long an idle worker sleeps between queue polls.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long a worker backs off after a failed task.
const FAILURE_BACKOFF: Duration = Duration::from_secs(5);

pub struct Worker {
    posts: Arc<PostRepository>,
    broker: Arc<dyn Broker>,
    batcher: Arc<Batcher>,
    crawler: PageCrawler,
    search: Option<GoogleSearchClient>,
    channel_client: Option<Arc<dyn ChannelClient>>,
}

impl Worker {
    pub fn new(
        posts: Arc<PostRepository>,
        broker: Arc<dyn Broker>,
        batcher: Arc<Batcher>,
        crawler: PageCrawler,
    ) -> Self {
        Self {
            posts,
            broker,
            batcher,
            crawler,
            search: None,
            channel_client: None,
        }
    }

    /// Attach a search client for the search queue.
    pub fn with_search(mut self, search: GoogleSearchClient) -> Self {
        self.search = Some(search);
        self
    }

    /// Attach a channel-ingestion client for the telegram queue.
    pub fn with_channel_client(mut self, client: Arc<dyn ChannelClient>) -> Self {
        self.channel_client = Some(client);
        self
    }

    /// Consume the given queues until the process stops.
    pub async fn run(&self, queues: &[QueueName]) -> anyhow::Result<()> {
        info!(
            "Worker consuming queues: {}",
            queues
                .iter()
                .map(QueueName::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        loop {
            let mut handled = false;
            for queue in queues {
                match self.broker.receive(*queue).await {
                    Ok(Some(delivery)) => {
                        handled = true;
                        match self.dispatch(&delivery.task).await {
                            Ok(()) => delivery.ack().await?,
                            Err(e) => {
                                error!("Task failed on {}: {}", queue, e);
                                delivery.nack(true).await?;
                                tokio::time::sleep(FAILURE_BACKOFF).await;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Broker receive failed on {}: {}", queue, e);
                        tokio::time::sleep(FAILURE_BACKOFF).await;
                    }
                }
            }
            if !handled {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }

    /// Process the given queues until a full pass finds them all empty.
    /// Failed tasks are dropped with a log. Returns how many tasks ran.
    pub async fn drain(&self, queues: &[QueueName]) -> anyhow::Result<u32> {
        let mut processed = 0;
        loop {
            let mut handled = false;
            for queue in queues {
                while let Some(delivery) = self.broker.receive(*queue).await? {
                    handled = true;
                    processed += 1;
                    match self.dispatch(&delivery.task).await {
                        Ok(()) => delivery.ack().await?,
                        Err(e) => {
                            error!("Task failed on {}: {}", queue, e);
                            delivery.nack(false).await?;
                        }
                    }
                }
            }
            if !handled {
                return Ok(processed);
            }
        }
    }

    async fn dispatch(&self, task: &TaskMessage) -> anyhow::Result<()> {
        match task {
            TaskMessage::Search(task) => self.handle_search(task).await,
            TaskMessage::Crawl(task) => self.handle_crawl(task).await,
            TaskMessage::Analyze(task) => self.handle_analyze(task).await,
            TaskMessage::Poll => self.handle_poll().await,
            TaskMessage::Channel(task) => self.handle_channel(task).await,
        }
    }

    /// Search every keyword, store new webpage hits, and route messenger
    /// links straight to channel ingestion.
    async fn handle_search(&self, task: &SearchTask) -> anyhow::Result<()> {
        let Some(search) = &self.search else {
            anyhow::bail!("search task received but no search client is configured");
        };

        for keyword in &task.keywords {
            let results = search.search(keyword, task.limit).await?;
            let mut webpages = 0;
            let mut channels = 0;

            for result in results {
                if is_telegram_link(&result.link) {
                    self.broker
                        .publish(&TaskMessage::Channel(ChannelTask {
                            identifier: result.link,
                            post_id: None,
                            path: None,
                        }))
                        .await?;
                    channels += 1;
                    continue;
                }

                let mut post = Post::new(result.title, result.link, result.domain);
                post.description = result.snippet;
                if let Some(post_id) = self.posts.insert_discovered(&post)? {
                    self.broker
                        .publish(&TaskMessage::Crawl(CrawlTask { post_id }))
                        .await?;
                    webpages += 1;
                }
            }

            info!(
                "Search results stored. keyword: {}, webpages: {}, channel links: {}",
                keyword, webpages, channels
            );
        }
        Ok(())
    }

    /// Fetch the post's page, store its text, and queue it for analysis.
    async fn handle_crawl(&self, task: &CrawlTask) -> anyhow::Result<()> {
        let Some(post) = self.posts.get(&task.post_id)? else {
            error!("Crawl task references an unknown post. post: {}", task.post_id);
            return Ok(());
        };

        match self.crawler.crawl(&post.link).await {
            Some(page) => {
                self.posts.set_content(&post.id, &page.html, &page.text)?;
                info!("Crawl result stored. post: {}, link: {}", post.id, post.link);
            }
            None => {
                warn!("Crawl produced no content. post: {}, link: {}", post.id, post.link);
            }
        }

        self.broker
            .publish(&TaskMessage::Analyze(AnalyzeTask {
                post_id: task.post_id.clone(),
            }))
            .await?;
        Ok(())
    }

    /// Register a crawled post into the open batch job.
    async fn handle_analyze(&self, task: &AnalyzeTask) -> anyhow::Result<()> {
        let Some(post) = self.posts.get(&task.post_id)? else {
            error!("Analyze task references an unknown post. post: {}", task.post_id);
            return Ok(());
        };
        if !post.is_analyzable() {
            debug!("Post is not analyzable, skipping registration. post: {}", post.id);
            return Ok(());
        }

        self.batcher.accumulator.register_post(&post)?;
        Ok(())
    }

    /// Run one batch tick.
    async fn handle_poll(&self) -> anyhow::Result<()> {
        let report = self.batcher.scheduler.run_tick().await?;
        debug!("Poll tick finished: {:?}", report);
        Ok(())
    }

    /// Ingest a channel and write the outcome back onto the post.
    async fn handle_channel(&self, task: &ChannelTask) -> anyhow::Result<()> {
        let Some(client) = &self.channel_client else {
            warn!(
                "No channel service configured, settling identifier with an error. identifier: {}",
                task.identifier
            );
            if let (Some(post_id), Some(path)) = (task.post_id.as_deref(), task.path.as_deref()) {
                self.posts.mark_identifier_processed(
                    post_id,
                    path,
                    Some("channel service is not configured"),
                )?;
            }
            return Ok(());
        };

        handle_channel_task(task, &self.posts, client.as_ref()).await?;
        Ok(())
    }
}
