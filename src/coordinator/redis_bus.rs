//! Redis pub/sub bus
//!
//! Publishing goes through a deadpool connection pool. Receiving uses one
//! dedicated pub/sub connection per instance, read by a background task that
//! forwards decoded envelopes into a local broadcast channel. When the
//! subscription drops the task resubscribes with exponential backoff;
//! envelopes published while it was down are not recovered here (clients
//! fill the gap through replay on their next reconnect).

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use futures::StreamExt;
use redis::aio::PubSub;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::bus::{BroadcastBus, Envelope};
use super::config::CoordinatorConfig;
use super::error::{CoordinatorError, CoordinatorResult};
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Handshake attempts before `connect` gives up
const CONNECT_RETRIES: u32 = 3;

/// Bus shared by instances through a Redis server
pub struct RedisBus {
    pool: Pool,
    channel: String,
    local: broadcast::Sender<Envelope>,
    subscriber: JoinHandle<()>,
}

impl RedisBus {
    /// Connect to Redis and start the subscriber task
    pub async fn connect(config: &CoordinatorConfig) -> CoordinatorResult<Self> {
        config.validate()?;

        let pool = PoolConfig::from_url(&config.redis_url)
            .builder()
            .map_err(|e| CoordinatorError::Pool(format!("Failed to create pool builder: {e}")))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(config.publish_timeout()))
            .create_timeout(Some(config.publish_timeout()))
            .recycle_timeout(Some(config.publish_timeout()))
            .build()
            .map_err(|e| CoordinatorError::Pool(format!("Failed to create Redis pool: {e}")))?;

        let retry = RetryConfig::with_delays(
            CONNECT_RETRIES,
            config.reconnect_base_delay_ms,
            config.reconnect_max_delay_ms,
        );

        // Test connection
        with_retry_if(&retry, || ping(&pool), CoordinatorError::is_recoverable).await?;

        let client = redis::Client::open(config.redis_url.as_str())?;
        let pubsub = with_retry_if(
            &retry,
            || open_subscription(&client, &config.channel),
            CoordinatorError::is_recoverable,
        )
        .await?;

        let (local, _) = broadcast::channel(config.relay_capacity.max(1));
        let subscriber = tokio::spawn(run_subscriber(
            client,
            config.channel.clone(),
            local.clone(),
            RetryConfig::with_delays(
                u32::MAX,
                config.reconnect_base_delay_ms,
                config.reconnect_max_delay_ms,
            ),
            pubsub,
        ));

        info!(url = %config.redis_url, channel = %config.channel, "Connected to Redis bus");

        Ok(Self {
            pool,
            channel: config.channel.clone(),
            local,
            subscriber,
        })
    }

    /// Channel name this bus publishes to
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for RedisBus {
    fn drop(&mut self) {
        self.subscriber.abort();
    }
}

#[async_trait]
impl BroadcastBus for RedisBus {
    async fn publish(&self, envelope: &Envelope) -> CoordinatorResult<()> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.pool.get().await?;
        let receivers: i64 = conn.publish(&self.channel, payload).await?;
        debug!(sequence_id = envelope.sequence_id, receivers, "Published envelope");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.local.subscribe()
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

async fn ping(pool: &Pool) -> CoordinatorResult<()> {
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
    Ok(())
}

async fn open_subscription(client: &redis::Client, channel: &str) -> CoordinatorResult<PubSub> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    Ok(pubsub)
}

/// Forward messages until the stream ends, then resubscribe forever
async fn run_subscriber(
    client: redis::Client,
    channel: String,
    local: broadcast::Sender<Envelope>,
    retry: RetryConfig,
    initial: PubSub,
) {
    let mut pubsub = Some(initial);
    let mut attempt: u32 = 0;

    loop {
        let current = match pubsub.take() {
            Some(p) => p,
            None => {
                attempt = attempt.saturating_add(1);
                let delay = retry.delay_for(attempt);
                warn!(
                    channel = %channel,
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Redis subscription lost, resubscribing"
                );
                tokio::time::sleep(delay).await;

                match open_subscription(&client, &channel).await {
                    Ok(p) => {
                        info!(channel = %channel, attempt, "Redis subscription restored");
                        attempt = 0;
                        p
                    }
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Resubscribe failed");
                        continue;
                    }
                }
            }
        };

        forward_messages(current, &local).await;
    }
}

async fn forward_messages(mut pubsub: PubSub, local: &broadcast::Sender<Envelope>) {
    let mut stream = pubsub.on_message();

    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable bus payload");
                continue;
            }
        };

        match serde_json::from_str::<Envelope>(&payload) {
            Ok(envelope) => {
                // No local subscriber yet is fine
                let _ = local.send(envelope);
            }
            Err(e) => warn!(error = %e, "Discarding malformed envelope"),
        }
    }
}
