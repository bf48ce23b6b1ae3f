//! Humanized pacing for acquisition cycles.
//!
//! Items are taken in batches of random size, shuffled within the batch, and
//! processed one at a time with a random pause after each item and a longer
//! random pause between batches. A failed item is counted and logged, never
//! fatal to the cycle.

use anyhow::Result;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Inclusive `[min, max]` ranges driving the cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub batch_size: [usize; 2],
    pub item_pause_ms: [u64; 2],
    pub batch_pause_ms: [u64; 2],
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            batch_size: [3, 6],
            item_pause_ms: [0, 5_000],
            batch_pause_ms: [20_000, 60_000],
        }
    }
}

impl PacingConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, [min, max]) in [
            ("batch_size", [self.batch_size[0] as u64, self.batch_size[1] as u64]),
            ("item_pause_ms", self.item_pause_ms),
            ("batch_pause_ms", self.batch_pause_ms),
        ] {
            if min > max {
                anyhow::bail!("pacing.{name}: min {min} exceeds max {max}");
            }
        }
        if self.batch_size[0] == 0 {
            anyhow::bail!("pacing.batch_size: min must be at least 1");
        }
        Ok(())
    }
}

/// Outcome counters of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items left unprocessed because shutdown was requested.
    pub skipped: usize,
}

pub struct AcquisitionScheduler<R: Rng> {
    pacing: PacingConfig,
    rng: R,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<R: Rng> AcquisitionScheduler<R> {
    pub fn new(pacing: PacingConfig, rng: R) -> Self {
        Self {
            pacing,
            rng,
            shutdown: None,
        }
    }

    /// Stop between items once `shutdown` turns true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn stopping(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn draw(&mut self, [min, max]: [u64; 2]) -> Duration {
        Duration::from_millis(self.rng.gen_range(min.min(max)..=max))
    }

    fn batch_len(&mut self, remaining: usize) -> usize {
        let [min, max] = self.pacing.batch_size;
        let min = min.max(1);
        self.rng.gen_range(min..=max.max(min)).min(remaining)
    }

    /// Run `work` over every item with humanized pacing.
    pub async fn run_cycle<T, F, Fut>(&mut self, items: Vec<T>, mut work: F) -> CycleReport
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let cycle = Uuid::new_v4();
        let total = items.len();
        let mut queue: VecDeque<T> = items.into();
        let mut report = CycleReport::default();
        info!("cycle {cycle}: {total} item(s) queued");

        while !queue.is_empty() {
            if self.stopping() {
                break;
            }
            let len = self.batch_len(queue.len());
            let mut batch: Vec<T> = queue.drain(..len).collect();
            batch.shuffle(&mut self.rng);
            report.batches += 1;
            debug!("cycle {cycle}: batch {} with {len} item(s)", report.batches);

            let mut batch = batch.into_iter();
            while let Some(item) = batch.next() {
                if self.stopping() {
                    report.skipped += 1 + batch.len();
                    break;
                }
                match work(item).await {
                    Ok(()) => report.succeeded += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!("cycle {cycle}: item failed: {e:#}");
                    }
                }
                let pause = self.draw(self.pacing.item_pause_ms);
                tokio::time::sleep(pause).await;
            }

            if !queue.is_empty() && !self.stopping() {
                let pause = self.draw(self.pacing.batch_pause_ms);
                debug!("cycle {cycle}: resting {}ms before next batch", pause.as_millis());
                tokio::time::sleep(pause).await;
            }
        }
        report.skipped += queue.len();

        info!(
            "cycle {cycle}: {} ok, {} failed, {} skipped in {} batch(es)",
            report.succeeded, report.failed, report.skipped, report.batches
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn pacing() -> PacingConfig {
        PacingConfig {
            batch_size: [2, 3],
            item_pause_ms: [100, 200],
            batch_pause_ms: [1_000, 2_000],
        }
    }

    async fn run(seed: u64, items: Vec<u32>) -> (Vec<u32>, CycleReport) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = AcquisitionScheduler::new(pacing(), StdRng::seed_from_u64(seed));
        let report = scheduler
            .run_cycle(items, |item| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(item);
                    Ok(())
                }
            })
            .await;
        let seen = seen.lock().unwrap().clone();
        (seen, report)
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_item_processed_once() {
        let (mut seen, report) = run(7, (0..10).collect()).await;
        assert_eq!(report.succeeded, 10);
        assert_eq!(report.failed, 0);
        assert!(report.batches >= 4 && report.batches <= 5, "{report:?}");
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_same_order() {
        let (a, _) = run(42, (0..12).collect()).await;
        let (b, _) = run(42, (0..12).collect()).await;
        assert_eq!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pauses_stay_within_bounds() {
        let start = Instant::now();
        let (_, report) = run(3, (0..6).collect()).await;
        let elapsed = start.elapsed();
        let gaps = (report.batches - 1) as u32;
        let min = Duration::from_millis(100) * 6 + Duration::from_millis(1_000) * gaps;
        let max = Duration::from_millis(200) * 6 + Duration::from_millis(2_000) * gaps;
        assert!(elapsed >= min && elapsed <= max, "{elapsed:?} not in {min:?}..={max:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_cycle() {
        let mut scheduler = AcquisitionScheduler::new(pacing(), StdRng::seed_from_u64(1));
        let report = scheduler
            .run_cycle((0..5).collect::<Vec<u32>>(), |item| async move {
                if item % 2 == 0 {
                    anyhow::bail!("item {item} blocked");
                }
                Ok(())
            })
            .await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_between_items() {
        let (tx, rx) = watch::channel(false);
        let tx = Arc::new(tx);
        let mut scheduler =
            AcquisitionScheduler::new(pacing(), StdRng::seed_from_u64(9)).with_shutdown(rx);
        let mut done = 0;
        let report = scheduler
            .run_cycle((0..8).collect::<Vec<u32>>(), |_| {
                done += 1;
                let stop = done == 3;
                let tx = Arc::clone(&tx);
                async move {
                    if stop {
                        let _ = tx.send(true);
                    }
                    Ok(())
                }
            })
            .await;
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.skipped, 5);
    }

    #[test]
    fn test_validate_rejects_inverted_ranges() {
        let mut p = PacingConfig::default();
        assert!(p.validate().is_ok());
        p.item_pause_ms = [10, 1];
        assert!(p.validate().is_err());
        p = PacingConfig {
            batch_size: [0, 2],
            ..PacingConfig::default()
        };
        assert!(p.validate().is_err());
    }
}
