use redis::{aio::MultiplexedConnection, aio::PubSub, Client};

#[derive(Clone)]
pub struct RedisClient {
    client: Client,
    pub conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(RedisClient { client, conn })
    }

    // Под pub/sub нужно отдельное соединение: мультиплексное подписки не держит
    pub async fn pubsub(&self) -> redis::RedisResult<PubSub> {
        self.client.get_async_pubsub().await
    }
}
