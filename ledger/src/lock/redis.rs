// ledger/src/lock/redis.rs
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::warn;
use uuid::Uuid;

use super::{Lease, PrincipalLock};
use crate::LedgerError;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// `SET NX PX` lock shared by every process talking to the same Redis.
/// The TTL frees a lock whose holder died without releasing it.
#[derive(Clone)]
pub struct RedisPrincipalLock {
    conn: MultiplexedConnection,
    ttl: Duration,
    prefix: String,
}

impl RedisPrincipalLock {
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self, LedgerError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self::from_connection(conn, ttl))
    }

    pub fn from_connection(conn: MultiplexedConnection, ttl: Duration) -> Self {
        Self {
            conn,
            ttl,
            prefix: "raast:lock:".to_string(),
        }
    }

    fn key(&self, principal: &str) -> String {
        format!("{}{}", self.prefix, principal)
    }
}

struct RedisLease {
    conn: MultiplexedConnection,
    key: String,
    token: String,
    released: bool,
}

async fn compare_and_delete(
    conn: &mut MultiplexedConnection,
    key: &str,
    token: &str,
) -> Result<(), LedgerError> {
    let _: i64 = redis::Script::new(RELEASE_SCRIPT)
        .key(key)
        .arg(token)
        .invoke_async(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl Lease for RedisLease {
    async fn release(&mut self) -> Result<(), LedgerError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        compare_and_delete(&mut self.conn, &self.key, &self.token).await
    }
}

impl Drop for RedisLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Best effort; the TTL covers the case where no runtime is left.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let mut conn = self.conn.clone();
            let key = std::mem::take(&mut self.key);
            let token = std::mem::take(&mut self.token);
            handle.spawn(async move {
                if let Err(err) = compare_and_delete(&mut conn, &key, &token).await {
                    warn!(%key, error = %err, "dropped redis lease not released");
                }
            });
        }
    }
}

#[async_trait]
impl PrincipalLock for RedisPrincipalLock {
    async fn try_acquire(&self, principal: &str) -> Result<Option<Box<dyn Lease>>, LedgerError> {
        let key = self.key(principal);
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();

        let set: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        if set.is_none() {
            return Ok(None);
        }

        Ok(Some(Box::new(RedisLease {
            conn,
            key,
            token,
            released: false,
        })))
    }
}
