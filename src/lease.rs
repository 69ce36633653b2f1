use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease backend failed: {0}")]
    Backend(String),
}

/// At most one cycle per task at a time. `acquire` returns the holder token, or `None`
/// while another holder's lease is live.
#[async_trait]
pub trait TaskLease: Send + Sync {
    async fn acquire(&self, task_id: &str, ttl: Duration) -> Result<Option<String>, LeaseError>;
    async fn release(&self, task_id: &str, token: &str) -> Result<(), LeaseError>;
}

fn lease_key(prefix: &str, task_id: &str) -> String {
    format!("{prefix}:lease:task:{task_id}")
}

#[derive(Clone)]
pub struct RedisLease {
    client: redis::Client,
    prefix: String,
}

impl RedisLease {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            prefix: "scout".to_string(),
        }
    }

    pub fn from_env() -> Option<Self> {
        std::env::var("REDIS_URL")
            .ok()
            .and_then(|url| redis::Client::open(url).ok())
            .map(Self::new)
    }
}

#[async_trait]
impl TaskLease for RedisLease {
    async fn acquire(&self, task_id: &str, ttl: Duration) -> Result<Option<String>, LeaseError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| LeaseError::Backend(err.to_string()))?;
        let token = Uuid::new_v4().to_string();
        let reply: Option<String> = redis::cmd("SET")
            .arg(lease_key(&self.prefix, task_id))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|err| LeaseError::Backend(err.to_string()))?;
        Ok(reply.map(|_| token))
    }

    async fn release(&self, task_id: &str, token: &str) -> Result<(), LeaseError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| LeaseError::Backend(err.to_string()))?;
        let _: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(lease_key(&self.prefix, task_id))
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|err| LeaseError::Backend(err.to_string()))?;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryLease {
    held: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

#[async_trait]
impl TaskLease for MemoryLease {
    async fn acquire(&self, task_id: &str, ttl: Duration) -> Result<Option<String>, LeaseError> {
        let mut guard = self.held.lock().await;
        let now = Instant::now();
        if let Some((_, expires)) = guard.get(task_id)
            && *expires > now
        {
            return Ok(None);
        }
        let token = Uuid::new_v4().to_string();
        guard.insert(task_id.to_string(), (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn release(&self, task_id: &str, token: &str) -> Result<(), LeaseError> {
        let mut guard = self.held.lock().await;
        if guard.get(task_id).is_some_and(|(held, _)| held == token) {
            guard.remove(task_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_holder_is_refused_until_release() {
        let lease = MemoryLease::default();
        let ttl = Duration::from_secs(60);
        let token = lease.acquire("t1", ttl).await.expect("acquire").expect("token");
        assert!(lease.acquire("t1", ttl).await.expect("acquire").is_none());
        assert!(lease.acquire("t2", ttl).await.expect("acquire").is_some());

        lease.release("t1", "someone-else").await.expect("release");
        assert!(lease.acquire("t1", ttl).await.expect("acquire").is_none());

        lease.release("t1", &token).await.expect("release");
        assert!(lease.acquire("t1", ttl).await.expect("acquire").is_some());
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken() {
        let lease = MemoryLease::default();
        lease
            .acquire("t1", Duration::from_millis(1))
            .await
            .expect("acquire");
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(lease.acquire("t1", Duration::from_secs(60)).await.expect("acquire").is_some());
    }

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(lease_key("scout", "abc"), "scout:lease:task:abc");
    }
}
