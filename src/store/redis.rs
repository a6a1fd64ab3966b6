use ::redis::Script;
use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::{SeatStore, Subscription, Versioned};
use crate::error::StoreError;
use crate::redis_client::RedisClient;

// KEYS: значение, версия, канал. ARGV: ожидаемая версия ('*' - любая), JSON сетки.
// Запись, инкремент версии и PUBLISH выполняются одним атомарным скриптом.
const WRITE_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[2]) or '0')
if ARGV[1] ~= '*' and current ~= tonumber(ARGV[1]) then
    return -1
end
redis.call('SET', KEYS[1], ARGV[2])
local version = redis.call('INCR', KEYS[2])
redis.call('PUBLISH', KEYS[3], '{"version":' .. version .. ',"value":' .. ARGV[2] .. '}')
return version
"#;

/// Сетка мест в Redis: `<key>` - JSON, `<key>:version` - счётчик записей,
/// изменения публикуются в `<key>:changes`.
#[derive(Clone)]
pub struct RedisSeatStore {
    redis: RedisClient,
    script: Script,
}

impl RedisSeatStore {
    pub fn new(redis: RedisClient) -> Self {
        Self {
            redis,
            script: Script::new(WRITE_SCRIPT),
        }
    }

    async fn write(&self, key: &str, expected: Option<u64>, value: Value) -> Result<Option<u64>, StoreError> {
        let payload = serde_json::to_string(&value)?;
        let expected = expected.map_or_else(|| "*".to_string(), |v| v.to_string());
        let mut conn = self.redis.conn.clone();

        let version: i64 = self
            .script
            .key(key)
            .key(version_key(key))
            .key(channel(key))
            .arg(expected)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;

        Ok(u64::try_from(version).ok())
    }
}

impl SeatStore for RedisSeatStore {
    fn get<'a>(&'a self, key: &'a str)
        -> BoxFuture<'a, Result<Option<Versioned<Value>>, StoreError>> {
        async move {
            let mut conn = self.redis.conn.clone();
            let (data, version): (Option<String>, Option<u64>) = ::redis::cmd("MGET")
                .arg(key)
                .arg(version_key(key))
                .query_async(&mut conn)
                .await?;

            match data {
                Some(data) => Ok(Some(Versioned {
                    version: version.unwrap_or_default(),
                    value: serde_json::from_str(&data)?,
                })),
                None => Ok(None),
            }
        }
        .boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<u64, StoreError>> {
        async move {
            self.write(key, None, value)
                .await?
                .ok_or_else(|| StoreError::Unavailable("unconditional write was rejected".into()))
        }
        .boxed()
    }

    fn compare_and_set<'a>(
        &'a self,
        key: &'a str,
        expected: u64,
        value: Value,
    ) -> BoxFuture<'a, Result<Option<u64>, StoreError>> {
        self.write(key, Some(expected), value).boxed()
    }

    fn subscribe<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Subscription, StoreError>> {
        async move {
            let channel = channel(key);
            let mut pubsub = self.redis.pubsub().await?;
            pubsub.subscribe(&channel).await?;

            let (tx, rx) = watch::channel(None);
            let forwarder = tokio::spawn(async move {
                let mut messages = pubsub.into_on_message();
                while let Some(msg) = messages.next().await {
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            warn!("Non-text payload on {}: {:?}", channel, e);
                            continue;
                        }
                    };
                    match parse_update(&payload) {
                        Ok(update) => {
                            if tx.send(Some(update)).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Unparseable update on {}: {:?}", channel, e),
                    }
                }
                debug!("Subscription forwarder for {} stopped", channel);
            });

            Ok(Subscription::with_forwarder(rx, forwarder))
        }
        .boxed()
    }
}

/// Конверт, который публикует WRITE_SCRIPT: `{"version":N,"value":<сетка>}`.
fn parse_update(payload: &str) -> Result<Versioned<Value>, serde_json::Error> {
    serde_json::from_str(payload)
}

fn version_key(key: &str) -> String {
    format!("{}:version", key)
}

fn channel(key: &str) -> String {
    format!("{}:changes", key)
}
