//! Token bucket rate limiter
//!
//! The bucket starts full (`burst` tokens) and refills at `rate` tokens per
//! second. Waiting for tokens goes through a [`Reservation`]: the tokens are
//! taken up front and the caller sleeps until the bucket would have held
//! them. A reservation that is dropped before it is committed (cancellation,
//! or the waiting future being dropped) puts its tokens back, so a failed
//! wait never consumes quota.
//!
//! ## Algorithm
//!
//! ```text
//! tokens(now) = min(burst, tokens(last) + rate * (now - last))
//! reserve(n): tokens -= n; ready_at = now + max(0, -tokens) / rate
//! ```

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

struct BucketState {
    tokens: f64,
    last: Instant,
}

/// Token bucket with cancellable, refundable waits
pub struct TokenBucket {
    rate: f64,
    burst: u32,
    state: Mutex<BucketState>,
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .finish()
    }
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                last: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst as f64);
        state.last = now;
    }

    /// Take `n` tokens now and report when they are actually available.
    pub fn reserve(&self, n: u32) -> Result<Reservation<'_>> {
        if n > self.burst {
            return Err(Error::InvalidArgument(format!(
                "requested {} tokens exceeds burst of {}",
                n, self.burst
            )));
        }

        let now = Instant::now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.tokens -= n as f64;

        let deficit = (-state.tokens).max(0.0);
        let ready_at = now + Duration::from_secs_f64(deficit / self.rate);

        Ok(Reservation {
            bucket: self,
            tokens: n,
            ready_at,
            committed: false,
        })
    }

    /// Wait until `n` tokens are available, or fail with `Cancelled`.
    pub async fn wait_n(&self, cancel: &CancellationToken, n: u32) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let reservation = self.reserve(n)?;
        reservation.wait(cancel).await?;
        reservation.commit();
        Ok(())
    }

    /// Tokens currently in the bucket (negative while reservations are pending)
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    fn refund(&self, n: u32) {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        state.tokens = (state.tokens + n as f64).min(self.burst as f64);
    }
}

/// Tokens taken from a bucket, refunded on drop unless committed
#[must_use = "dropping a reservation refunds its tokens"]
pub struct Reservation<'a> {
    bucket: &'a TokenBucket,
    tokens: u32,
    ready_at: Instant,
    committed: bool,
}

impl Reservation<'_> {
    pub fn ready_at(&self) -> Instant {
        self.ready_at
    }

    /// Sleep until the reserved tokens are available.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        if self.ready_at <= Instant::now() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = sleep_until(self.ready_at) => Ok(()),
        }
    }

    /// Keep the tokens.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.bucket.refund(self.tokens);
        }
    }
}
