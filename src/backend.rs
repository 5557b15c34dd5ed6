//! Shared remote access
//!
//! A [`Backend`] bundles everything a lane or index needs to talk to the
//! store: the rate-limited client pool, the retry policy and the record
//! geometry. It is shared by `Arc` between a file and all of its lanes.

use crate::codec;
use crate::config::FsConfig;
use crate::error::Result;
use crate::pool::{ClientHandle, ClientPool};
use crate::retry::RetryPolicy;
use std::future::Future;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct Backend {
    pool: ClientPool,
    policy: RetryPolicy,
    max_record_size: usize,
    page_size: usize,
}

impl Backend {
    pub fn new(pool: ClientPool, config: &FsConfig) -> Self {
        Self {
            pool,
            policy: RetryPolicy::from(&config.retry),
            max_record_size: config.max_record_size,
            page_size: config.page_size,
        }
    }

    pub fn pool(&self) -> &ClientPool {
        &self.pool
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn max_record_size(&self) -> usize {
        self.max_record_size
    }

    /// Payload bytes that fit in one record
    pub fn effective_record_size(&self) -> usize {
        codec::effective_record_size(self.max_record_size)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Take a client worth `tokens` calls and run `f` once, without retry.
    pub async fn once<T, F, Fut>(&self, cancel: &CancellationToken, tokens: u32, f: F) -> Result<T>
    where
        F: FnOnce(ClientHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let client = self.pool.take(cancel, tokens).await?;
        f(client).await
    }

    /// Run `f` under the retry policy. Every attempt takes a fresh client
    /// from the pool, so retries are rate limited and spread over credentials.
    pub async fn retry<T, F, Fut>(&self, cancel: &CancellationToken, op: &'static str, tokens: u32, f: F) -> Result<T>
    where
        F: Fn(ClientHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let pool = &self.pool;
        let f = &f;
        self.policy
            .run(cancel, op, move || async move {
                let client = pool.take(cancel, tokens).await?;
                f(client).await
            })
            .await
    }
}
