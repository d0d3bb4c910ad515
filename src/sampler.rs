//! # Self-Watch Sampler
//!
//! Periodically publishes the concatenated status of every watched parameter
//! to a progress sink while the function body runs.
//!
//! ```text
//! Idle ──(no sink)──────────────────────────► Stopped
//! Running ──(interval ticks)──► publish ──► … ──stop()──► final publish ──► Stopped
//! ```
//!
//! Publish failures are swallowed. `stop()` cancels the background task,
//! waits for it, then takes one final sample before returning.

use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::bind_result::BoundValue;
use crate::watch::{CountingSequence, SelfWatch};

/// Destination for progress snapshots; best-effort, no delivery guarantee
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, snapshot: &str) -> Result<()>;
}

/// Records every snapshot it receives
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    snapshots: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<bool>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail (the snapshot is not recorded)
    pub fn fail_publishes(&self, fail: bool) {
        *self.failing.lock() = fail;
    }

    pub fn snapshots(&self) -> Vec<String> {
        self.snapshots.lock().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.snapshots.lock().last().cloned()
    }
}

#[async_trait]
impl ProgressSink for MemorySink {
    async fn publish(&self, snapshot: &str) -> Result<()> {
        if *self.failing.lock() {
            bail!("progress sink unavailable");
        }
        self.snapshots.lock().push(snapshot.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Delay before the first sample, shorter than the steady interval
    pub initial_delay: Duration,
    pub interval: Duration,
    pub separator: String,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(3_000),
            interval: Duration::from_millis(10_000),
            separator: "\n".to_string(),
        }
    }
}

/// Replace every unwatched sequence with a counting wrapper and use it as the watcher
///
/// Values and watchers are positional: `watchers[i]` belongs to `values[i]`.
pub fn wrap_sequences(values: &mut [BoundValue], watchers: &mut [Option<Arc<dyn SelfWatch>>]) {
    for (value, watcher) in values.iter_mut().zip(watchers.iter_mut()) {
        if watcher.is_some() || !value.is_sequence() {
            continue;
        }
        if let BoundValue::Sequence(inner) = mem::replace(value, BoundValue::Empty) {
            let (counting, watch) = CountingSequence::wrap(inner);
            *value = BoundValue::Sequence(Box::new(counting));
            *watcher = Some(Arc::new(watch));
        }
    }
}

struct Watchers {
    watchers: Vec<Option<Arc<dyn SelfWatch>>>,
    separator: String,
}

impl Watchers {
    /// One line per parameter, blank for parameters without a watcher
    fn snapshot(&self) -> String {
        self.watchers
            .iter()
            .map(|watcher| match watcher {
                Some(w) => catch_unwind(AssertUnwindSafe(|| w.status())).unwrap_or_default(),
                None => String::new(),
            })
            .collect::<Vec<_>>()
            .join(&self.separator)
    }
}

enum SamplerState {
    Idle,
    Running {
        cancel: CancellationToken,
        task: JoinHandle<()>,
        sink: Arc<dyn ProgressSink>,
        watchers: Arc<Watchers>,
    },
    Stopped,
}

pub struct SelfWatchSampler;

impl SelfWatchSampler {
    /// Start sampling; without a sink the sampler stays idle
    pub fn start(
        watchers: Vec<Option<Arc<dyn SelfWatch>>>,
        sink: Option<Arc<dyn ProgressSink>>,
        config: SamplerConfig,
    ) -> SamplerHandle {
        let Some(sink) = sink else {
            return SamplerHandle {
                state: SamplerState::Idle,
            };
        };
        let watchers = Arc::new(Watchers {
            watchers,
            separator: config.separator.clone(),
        });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sample_loop(
            Arc::clone(&watchers),
            Arc::clone(&sink),
            config.initial_delay,
            config.interval,
            cancel.child_token(),
        ));
        SamplerHandle {
            state: SamplerState::Running {
                cancel,
                task,
                sink,
                watchers,
            },
        }
    }
}

#[instrument(level = "debug", skip_all, fields(interval_ms = interval.as_millis() as u64))]
async fn sample_loop(
    watchers: Arc<Watchers>,
    sink: Arc<dyn ProgressSink>,
    initial_delay: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut delay = initial_delay;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {
                let snapshot = watchers.snapshot();
                if let Err(e) = sink.publish(&snapshot).await {
                    debug!(error = %e, "Progress publish failed");
                }
                delay = interval;
            }
        }
    }
}

/// Owned by the orchestrator for one invocation
pub struct SamplerHandle {
    state: SamplerState,
}

impl SamplerHandle {
    pub fn is_running(&self) -> bool {
        matches!(self.state, SamplerState::Running { .. })
    }

    /// Halt sampling and publish one final snapshot; `None` when idle
    pub async fn stop(&mut self) -> Option<String> {
        match mem::replace(&mut self.state, SamplerState::Stopped) {
            SamplerState::Running {
                cancel,
                task,
                sink,
                watchers,
            } => {
                cancel.cancel();
                if let Err(e) = task.await {
                    warn!(error = %e, "Sampler task ended abnormally");
                }
                let snapshot = watchers.snapshot();
                if let Err(e) = sink.publish(&snapshot).await {
                    debug!(error = %e, "Final progress publish failed");
                }
                Some(snapshot)
            }
            SamplerState::Idle | SamplerState::Stopped => None,
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        if let SamplerState::Running { cancel, .. } = &self.state {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::StatusCell;
    use serde_json::json;

    fn fast() -> SamplerConfig {
        SamplerConfig {
            initial_delay: Duration::from_millis(5),
            interval: Duration::from_millis(10),
            separator: "\n".into(),
        }
    }

    #[tokio::test]
    async fn idle_without_sink() {
        let mut handle = SelfWatchSampler::start(vec![None], None, fast());
        assert!(!handle.is_running());
        assert_eq!(handle.stop().await, None);
    }

    #[tokio::test]
    async fn stop_publishes_final_state_before_first_tick() {
        let sink = MemorySink::new();
        let status = StatusCell::new("starting");
        let config = SamplerConfig {
            initial_delay: Duration::from_secs(3600),
            ..fast()
        };
        let mut handle = SelfWatchSampler::start(
            vec![Some(status.clone() as Arc<dyn SelfWatch>), None],
            Some(Arc::new(sink.clone())),
            config,
        );
        status.set("done");
        let last = handle.stop().await;

        assert_eq!(last.as_deref(), Some("done\n"));
        assert_eq!(sink.snapshots(), vec!["done\n".to_string()]);
        assert_eq!(handle.stop().await, None);
    }

    #[tokio::test]
    async fn publishes_periodically_and_swallows_failures() {
        let sink = MemorySink::new();
        let status = StatusCell::new("working");
        let mut handle = SelfWatchSampler::start(
            vec![Some(status as Arc<dyn SelfWatch>)],
            Some(Arc::new(sink.clone())),
            fast(),
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!sink.snapshots().is_empty());

        sink.fail_publishes(true);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(handle.stop().await.is_some());
    }

    #[test]
    fn unwatched_sequences_are_wrapped() {
        let mut values = vec![
            BoundValue::Sequence(Box::new(vec![json!(1), json!(2)].into_iter())),
            BoundValue::Text("x".into()),
        ];
        let mut watchers: Vec<Option<Arc<dyn SelfWatch>>> = vec![None, None];
        wrap_sequences(&mut values, &mut watchers);

        assert!(watchers[0].is_some());
        assert!(watchers[1].is_none());
        if let BoundValue::Sequence(seq) = &mut values[0] {
            assert_eq!(seq.next(), Some(json!(1)));
        }
        assert_eq!(watchers[0].as_ref().unwrap().status(), "Read 1 items.");
    }
}
