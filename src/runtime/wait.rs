//! Suspend/resume/cancel/timeout for step-scoped asynchronous waits.
//!
//! The wait manager turns "this step is waiting for an external thing" into
//! a first-class, schedulable state without blocking a task. A wait is a
//! oneshot-backed [`WaitFuture`] keyed by step id; it resolves when an
//! external caller resumes it, rejects on cancellation, and follows one of
//! three [`TimeoutStrategy`]s when an armed timer fires.
//!
//! Invariants: at most one active wait per step; every active wait has
//! exactly one resolution path (resume, cancel or timeout); on any
//! resolution both the map entry and the timer are released.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::progress::ProgressManager;
use crate::error::EngineError;
use crate::event_bus::{EventKind, EventScope};
use crate::types::{WaitKind, WaitingInfo};

/// What happens when a wait's timer fires.
#[derive(Clone, Debug)]
pub enum TimeoutStrategy {
    /// Reject the future with a [`EngineError::Timeout`].
    Error,
    /// Resolve the future with a pre-set fallback value.
    Default(Value),
    /// Emit the timeout event, re-arm the timer, and remain waiting.
    Ignore,
}

struct WaitItem {
    info: WaitingInfo,
    resolver: oneshot::Sender<Result<Value, EngineError>>,
    timer: Option<JoinHandle<()>>,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    strategy: TimeoutStrategy,
    started: Instant,
}

/// Future returned by [`WaitManager::start_wait`].
///
/// Resolves to the resumption value, or rejects with a cancellation or
/// timeout error. Dropping the manager side rejects with a cancellation.
#[derive(Debug)]
pub struct WaitFuture {
    rx: oneshot::Receiver<Result<Value, EngineError>>,
}

impl Future for WaitFuture {
    type Output = Result<Value, EngineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => {
                Poll::Ready(Err(EngineError::cancelled("wait abandoned")))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Registry of active waits for one workflow instance.
///
/// Cheap to clone; timer tasks hold their own clone to resolve timeouts.
#[derive(Clone)]
pub struct WaitManager {
    items: Arc<Mutex<FxHashMap<String, WaitItem>>>,
    scope: EventScope,
    progress: Arc<ProgressManager>,
}

impl WaitManager {
    pub fn new(scope: EventScope, progress: Arc<ProgressManager>) -> Self {
        Self {
            items: Arc::new(Mutex::new(FxHashMap::default())),
            scope,
            progress,
        }
    }

    /// Starts a wait whose timeout (if any) rejects with a timeout error.
    pub fn start_wait(
        &self,
        step_id: &str,
        kind: WaitKind,
        target_id: &str,
        timeout: Option<Duration>,
        data: Option<Value>,
    ) -> Result<WaitFuture, EngineError> {
        self.start_wait_with_config(step_id, kind, target_id, timeout, data, TimeoutStrategy::Error)
    }

    /// Starts a wait with an explicit timeout strategy.
    ///
    /// Sets the step's runtime status to WaitingInput, emits `wait_start`,
    /// and arms a timer when `timeout` is given. The strategy is evaluated
    /// inside the timer callback.
    ///
    /// # Errors
    ///
    /// [`EngineError::WaitConflict`] if the step already has an active wait.
    pub fn start_wait_with_config(
        &self,
        step_id: &str,
        kind: WaitKind,
        target_id: &str,
        timeout: Option<Duration>,
        data: Option<Value>,
        strategy: TimeoutStrategy,
    ) -> Result<WaitFuture, EngineError> {
        let (tx, rx) = oneshot::channel();
        let info = WaitingInfo {
            kind,
            target_id: target_id.to_string(),
            started_at: Utc::now(),
            timeout_ms: timeout.map(|t| t.as_millis() as u64),
            data,
        };

        {
            let mut items = self.items.lock();
            if items.contains_key(step_id) {
                return Err(EngineError::WaitConflict {
                    step_id: step_id.to_string(),
                });
            }
            items.insert(
                step_id.to_string(),
                WaitItem {
                    info: info.clone(),
                    resolver: tx,
                    timer: None,
                    deadline: timeout.map(|t| Instant::now() + t),
                    timeout,
                    strategy,
                    started: Instant::now(),
                },
            );
        }

        self.progress.set_waiting(step_id, info.clone());
        self.scope.emit(
            EventKind::WaitStart,
            Some(step_id),
            json!({
                "type": info.kind,
                "targetId": info.target_id,
                "timeout": info.timeout_ms,
            }),
        );

        if let Some(timeout) = timeout {
            self.arm_timer(step_id, timeout);
        }

        Ok(WaitFuture { rx })
    }

    /// Resolves an active wait with `value`.
    ///
    /// Returns `false` if no wait exists for the step.
    pub fn resume_wait(&self, step_id: &str, value: Value) -> bool {
        let Some(item) = self.take(step_id) else {
            return false;
        };
        let elapsed_ms = item.started.elapsed().as_millis() as u64;
        self.progress.clear_waiting(step_id);
        self.scope.emit(
            EventKind::WaitResume,
            Some(step_id),
            json!({
                "type": item.info.kind,
                "targetId": item.info.target_id,
                "result": &value,
                "elapsedTime": elapsed_ms,
            }),
        );
        let _ = item.resolver.send(Ok(value));
        true
    }

    /// Rejects an active wait with a cancellation error carrying `reason`.
    pub fn cancel_wait(&self, step_id: &str, reason: &str) -> bool {
        self.reject(step_id, EngineError::cancelled(reason), reason)
    }

    /// Rejects an active wait with an arbitrary error.
    pub fn fail_wait(&self, step_id: &str, error: EngineError) -> bool {
        let reason = error.to_string();
        self.reject(step_id, error, &reason)
    }

    /// Cancels every active wait with the same reason.
    pub fn cancel_all_waits(&self, reason: &str) {
        let step_ids: Vec<String> = self.items.lock().keys().cloned().collect();
        for step_id in step_ids {
            self.cancel_wait(&step_id, reason);
        }
    }

    /// Pushes the wait's absolute deadline by `extra_ms` (may be negative).
    ///
    /// If the adjusted deadline leaves no remaining time, the timeout path
    /// runs immediately. Returns `false` for unknown steps or waits without
    /// a timeout.
    pub fn extend_timeout(&self, step_id: &str, extra_ms: i64) -> bool {
        let timed_out = {
            let mut items = self.items.lock();
            let Some(item) = items.get_mut(step_id) else {
                return false;
            };
            let Some(deadline) = item.deadline else {
                return false;
            };
            let new_deadline = if extra_ms >= 0 {
                deadline + Duration::from_millis(extra_ms as u64)
            } else {
                deadline
                    .checked_sub(Duration::from_millis(extra_ms.unsigned_abs()))
                    .unwrap_or_else(Instant::now)
            };
            item.deadline = Some(new_deadline);
            new_deadline <= Instant::now()
        };
        if timed_out {
            self.handle_timeout(step_id);
        }
        true
    }

    #[must_use]
    pub fn is_waiting(&self, step_id: &str) -> bool {
        self.items.lock().contains_key(step_id)
    }

    #[must_use]
    pub fn waiting_info(&self, step_id: &str) -> Option<WaitingInfo> {
        self.items.lock().get(step_id).map(|item| item.info.clone())
    }

    /// Time left until the wait's deadline; `None` without an armed timer.
    #[must_use]
    pub fn remaining_time(&self, step_id: &str) -> Option<Duration> {
        self.items
            .lock()
            .get(step_id)
            .and_then(|item| item.deadline)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    #[must_use]
    pub fn waiting_step_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.items.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.items.lock().len()
    }

    fn reject(&self, step_id: &str, error: EngineError, reason: &str) -> bool {
        let Some(item) = self.take(step_id) else {
            return false;
        };
        self.progress.clear_waiting(step_id);
        self.scope.emit(
            EventKind::WaitCancel,
            Some(step_id),
            json!({
                "type": item.info.kind,
                "targetId": item.info.target_id,
                "reason": reason,
            }),
        );
        let _ = item.resolver.send(Err(error));
        true
    }

    /// Removes an item, releasing its timer.
    fn take(&self, step_id: &str) -> Option<WaitItem> {
        let item = self.items.lock().remove(step_id)?;
        if let Some(timer) = &item.timer {
            timer.abort();
        }
        Some(item)
    }

    fn arm_timer(&self, step_id: &str, timeout: Duration) {
        let manager = self.clone();
        let id = step_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            manager.handle_timeout(&id);
        });
        let mut items = self.items.lock();
        match items.get_mut(step_id) {
            // The wait may have been resolved while the task was spawned.
            Some(item) => {
                if let Some(old) = item.timer.replace(handle) {
                    old.abort();
                }
            }
            None => handle.abort(),
        }
    }

    fn handle_timeout(&self, step_id: &str) {
        enum Outcome {
            /// Fired early (deadline was extended); silently re-arm.
            Rearm(Duration),
            /// Ignore strategy: emit the timeout, stay waiting, re-arm.
            IgnoreRearm(WaitingInfo, u64, Duration),
            /// Error/Default strategy: resolve and release the wait.
            Resolve(WaitItem, u64),
        }

        let outcome = {
            let mut items = self.items.lock();
            let Some(item) = items.get_mut(step_id) else {
                return;
            };
            let Some(deadline) = item.deadline else {
                return;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining > Duration::ZERO {
                Outcome::Rearm(remaining)
            } else {
                let elapsed_ms = item.started.elapsed().as_millis() as u64;
                if matches!(item.strategy, TimeoutStrategy::Ignore) {
                    let timeout = item.timeout.unwrap_or(Duration::ZERO);
                    item.deadline = Some(Instant::now() + timeout);
                    Outcome::IgnoreRearm(item.info.clone(), elapsed_ms, timeout)
                } else {
                    let item = items.remove(step_id).expect("present");
                    Outcome::Resolve(item, elapsed_ms)
                }
            }
        };

        match outcome {
            Outcome::Rearm(remaining) => self.arm_timer(step_id, remaining),
            Outcome::IgnoreRearm(info, elapsed_ms, timeout) => {
                self.emit_timeout(&info, step_id, elapsed_ms);
                self.arm_timer(step_id, timeout);
            }
            Outcome::Resolve(item, elapsed_ms) => {
                // Covers the synchronous trigger path (deadline pulled into
                // the past), where the armed timer would otherwise linger.
                if let Some(timer) = &item.timer {
                    timer.abort();
                }
                self.emit_timeout(&item.info, step_id, elapsed_ms);
                self.progress.clear_waiting(step_id);
                let result = match item.strategy {
                    TimeoutStrategy::Error => Err(EngineError::Timeout {
                        step_id: Some(step_id.to_string()),
                        timeout_ms: item.info.timeout_ms.unwrap_or(0),
                    }),
                    TimeoutStrategy::Default(value) => Ok(value),
                    TimeoutStrategy::Ignore => unreachable!("ignore re-arms above"),
                };
                let _ = item.resolver.send(result);
            }
        }
    }

    fn emit_timeout(&self, info: &WaitingInfo, step_id: &str, elapsed_ms: u64) {
        self.scope.emit(
            EventKind::WaitTimeout,
            Some(step_id),
            json!({
                "type": info.kind,
                "targetId": info.target_id,
                "timeout": info.timeout_ms,
                "elapsedTime": elapsed_ms,
            }),
        );
    }
}
