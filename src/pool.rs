//! Credentialed client pool
//!
//! Every remote call first takes tokens from the pool. Two token buckets
//! gate each call: one global bucket shared by all credentials (the
//! aggregate project quota) and one bucket per credential (the per-user
//! quota). Credentials are handed out round robin, so the effective
//! throughput grows with the number of credentials until the global quota
//! is reached.

use crate::config::LimitConfig;
use crate::error::{Error, Result};
use crate::limiter::TokenBucket;
use crate::remote::RemoteStore;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A store client authenticated as one identity
#[derive(Clone)]
pub struct Credential {
    /// Identity e-mail, used to share new containers across credentials
    pub email: Option<String>,
    pub store: Arc<dyn RemoteStore>,
}

impl Credential {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { email: None, store }
    }

    pub fn with_email(store: Arc<dyn RemoteStore>, email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            store,
        }
    }
}

struct PooledClient {
    credential: Credential,
    limiter: TokenBucket,
}

/// Client bound to one credential, returned by [`ClientPool::take`]
#[derive(Clone)]
pub struct ClientHandle {
    store: Arc<dyn RemoteStore>,
    index: usize,
}

impl ClientHandle {
    /// Position of the credential within the pool
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Deref for ClientHandle {
    type Target = dyn RemoteStore;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}

/// Rate-limited, round-robin pool of credentials
pub struct ClientPool {
    global: TokenBucket,
    clients: Vec<PooledClient>,
    next: Mutex<usize>,
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool")
            .field("clients", &self.clients.len())
            .field("global", &self.global)
            .finish()
    }
}

impl ClientPool {
    pub fn new(credentials: Vec<Credential>, limits: &LimitConfig) -> Result<Self> {
        if credentials.is_empty() {
            return Err(Error::InvalidArgument(
                "client pool needs at least one credential".to_string(),
            ));
        }

        let clients = credentials
            .into_iter()
            .map(|credential| PooledClient {
                credential,
                limiter: TokenBucket::new(limits.per_credential_rate, limits.per_credential_burst),
            })
            .collect();

        Ok(Self {
            global: TokenBucket::new(limits.total_rate, limits.total_burst),
            clients,
            next: Mutex::new(0),
        })
    }

    /// Pool over a single anonymous credential
    pub fn single(store: Arc<dyn RemoteStore>, limits: &LimitConfig) -> Self {
        Self {
            global: TokenBucket::new(limits.total_rate, limits.total_burst),
            clients: vec![PooledClient {
                credential: Credential::new(store),
                limiter: TokenBucket::new(limits.per_credential_rate, limits.per_credential_burst),
            }],
            next: Mutex::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Tokens left in the aggregate bucket
    pub fn global_available(&self) -> f64 {
        self.global.available()
    }

    /// E-mails of the credentials that carry one
    pub fn emails(&self) -> Vec<String> {
        self.clients
            .iter()
            .filter_map(|c| c.credential.email.clone())
            .collect()
    }

    /// Wait for `n` tokens on the global bucket, then on the next credential's
    /// bucket. Tokens from either tier are returned if the wait is cancelled.
    pub async fn take(&self, cancel: &CancellationToken, n: u32) -> Result<ClientHandle> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let global = self.global.reserve(n)?;
        global.wait(cancel).await?;

        let index = {
            let mut next = self.next.lock();
            let index = *next;
            *next = (index + 1) % self.clients.len();
            index
        };
        let client = &self.clients[index];

        let local = client.limiter.reserve(n)?;
        local.wait(cancel).await?;

        global.commit();
        local.commit();
        trace!(client = index, tokens = n, "Took client from pool");

        Ok(ClientHandle {
            store: Arc::clone(&client.credential.store),
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use std::time::Duration;
    use tokio::time::Instant;

    fn limits(per_credential_rate: f64, total_rate: f64) -> LimitConfig {
        LimitConfig {
            per_credential_rate,
            per_credential_burst: 4,
            total_rate,
            total_burst: 100,
        }
    }

    fn credentials(n: usize) -> Vec<Credential> {
        (0..n)
            .map(|i| Credential::with_email(Arc::new(MemoryStore::new()), format!("sa{}@example.com", i)))
            .collect()
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        assert!(matches!(
            ClientPool::new(Vec::new(), &LimitConfig::default()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_round_robin_selection() {
        let pool = ClientPool::new(credentials(3), &limits(1000.0, 1000.0)).unwrap();
        let cancel = CancellationToken::new();

        let mut order = Vec::new();
        for _ in 0..6 {
            order.push(pool.take(&cancel, 1).await.unwrap().index());
        }
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(pool.emails().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_credentials_multiply_throughput() {
        let cancel = CancellationToken::new();
        let start = Instant::now();

        // 16 tokens over two credentials at 4/s with burst 4 need one second of
        // refill; a single credential would need three
        let pool = ClientPool::new(credentials(2), &limits(4.0, 1000.0)).unwrap();
        for _ in 0..8 {
            pool.take(&cancel, 2).await.unwrap();
        }
        let elapsed = Instant::now() - start;
        assert!(elapsed >= Duration::from_millis(950), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1500), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_take_consumes_nothing() {
        let pool = ClientPool::new(credentials(1), &limits(1.0, 1000.0)).unwrap();
        let cancel = CancellationToken::new();
        pool.take(&cancel, 4).await.unwrap();

        let global_before = pool.global.available();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        assert!(matches!(pool.take(&cancel, 2).await, Err(Error::Cancelled)));
        assert!(pool.global.available() >= global_before);
        let local = pool.clients[0].limiter.available();
        assert!(local >= 0.0 && local < 0.1, "local = {}", local);
    }
}
