//! # Cooperative Scheduling
//!
//! Absorbing a 50k-row page in one synchronous burst would starve every other
//! task on the runtime. [`CooperativeScheduler::absorb`] copies items in chunks
//! and hands control back to the runtime at a bounded interval.
//!
//! ## Configuration
//!
//! - `chunk_size`: items appended per `extend` call
//! - `yield_every`: items appended between two checkpoints

use crate::errors::LoadError;
use tokio_util::sync::CancellationToken;

/// Chunking and yield interval for absorbing page items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooperativeScheduler {
    chunk_size: usize,
    yield_every: usize,
}

/// What one `absorb` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AbsorbStats {
    /// Items appended to the accumulator.
    pub items: usize,
    /// Chunks appended.
    pub chunks: usize,
    /// Checkpoints at which control went back to the runtime.
    pub yields: usize,
}

impl Default for CooperativeScheduler {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_CHUNK_SIZE,
            crate::config::DEFAULT_YIELD_EVERY,
        )
    }
}

impl CooperativeScheduler {
    /// Zero values are raised to 1.
    pub fn new(chunk_size: usize, yield_every: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            yield_every: yield_every.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn yield_every(&self) -> usize {
        self.yield_every
    }

    /// Append every element of `items` to `into`, in order.
    ///
    /// Control returns to the runtime at least once per `yield_every` items.
    /// When `cancel` fires, the next checkpoint stops with
    /// [`LoadError::Cancelled`]; whatever was appended so far stays in `into`
    /// and is the caller's to discard.
    pub async fn absorb<T>(
        &self,
        items: Vec<T>,
        into: &mut Vec<T>,
        cancel: Option<&CancellationToken>,
    ) -> Result<AbsorbStats, LoadError> {
        let mut stats = AbsorbStats::default();
        into.reserve(items.len());
        let mut since_checkpoint = 0usize;
        let mut remaining = items.into_iter();

        loop {
            let chunk_len = self
                .chunk_size
                .min(self.yield_every - since_checkpoint)
                .min(remaining.len());
            if chunk_len == 0 {
                break;
            }
            into.extend(remaining.by_ref().take(chunk_len));
            stats.items += chunk_len;
            stats.chunks += 1;
            since_checkpoint += chunk_len;

            if since_checkpoint >= self.yield_every {
                since_checkpoint = 0;
                checkpoint(cancel).await?;
                stats.yields += 1;
            }
        }

        Ok(stats)
    }
}

/// Yield to the runtime, then observe cancellation.
pub async fn checkpoint(cancel: Option<&CancellationToken>) -> Result<(), LoadError> {
    tokio::task::yield_now().await;
    match cancel {
        Some(token) if token.is_cancelled() => Err(LoadError::Cancelled),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absorb_preserves_order_and_counts() {
        let scheduler = CooperativeScheduler::new(3, 4);
        let mut acc = vec![-1];
        let stats = scheduler.absorb((0..10).collect(), &mut acc, None).await.unwrap();
        assert_eq!(acc, vec![-1, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(stats.items, 10);
        // 10 items with a checkpoint every 4: after item 4 and item 8.
        assert_eq!(stats.yields, 2);
    }

    #[tokio::test]
    async fn chunks_never_cross_a_checkpoint() {
        let scheduler = CooperativeScheduler::new(5, 2);
        let mut acc = Vec::new();
        let stats = scheduler.absorb(vec![1; 6], &mut acc, None).await.unwrap();
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.yields, 3);
    }

    #[tokio::test]
    async fn empty_input_does_nothing() {
        let scheduler = CooperativeScheduler::default();
        let mut acc: Vec<u8> = Vec::new();
        let stats = scheduler.absorb(Vec::new(), &mut acc, None).await.unwrap();
        assert_eq!(stats, AbsorbStats::default());
    }

    #[tokio::test]
    async fn cancellation_is_observed_at_checkpoint() {
        let scheduler = CooperativeScheduler::new(2, 2);
        let token = CancellationToken::new();
        token.cancel();
        let mut acc = Vec::new();
        let err = scheduler
            .absorb(vec![0u8; 10], &mut acc, Some(&token))
            .await
            .unwrap_err();
        assert_eq!(err, LoadError::Cancelled);
        assert_eq!(acc.len(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn other_tasks_run_during_absorb() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            })
        };

        let scheduler = CooperativeScheduler::new(10, 10);
        let mut acc = Vec::new();
        scheduler.absorb(vec![0u32; 1000], &mut acc, None).await.unwrap();
        ticker.abort();
        assert!(ticks.load(Ordering::SeqCst) >= 20);
    }
}
