//! Retry loop with exponential backoff.

use crate::error::{ClientError, Result};
use crate::policy::ReconnectPolicy;
use futures_util::future::BoxFuture;
use rally_core::ConnectionState;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Future returned by a reconnect callback.
pub type ReconnectFuture = BoxFuture<'static, Result<()>>;

/// Async hook invoked once per retry attempt. `Ok` ends the loop.
pub type ReconnectCallback = Arc<dyn Fn() -> ReconnectFuture + Send + Sync>;

/// Drives the retry loop after a session is lost.
///
/// At most one loop runs at a time. The loop publishes its progress on the
/// shared connection-state channel: `Connecting` while an attempt is in
/// flight, `Error(cause)` after a failed attempt and
/// `Error("max attempts exceeded")` once the policy is exhausted.
pub struct Reconnector {
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ConnectionState>>,
    callback: Arc<Mutex<Option<ReconnectCallback>>>,
    progress: Arc<Progress>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct Progress {
    attempt: AtomicU32,
    flags: Mutex<RunFlags>,
}

#[derive(Default)]
struct RunFlags {
    running: bool,
    /// A session was lost while the loop was still running.
    lost_again: bool,
}

impl Progress {
    fn is_running(&self) -> bool {
        self.flags.lock().map(|f| f.running).unwrap_or(false)
    }

    /// End the loop after a successful attempt. Returns `false`, and keeps
    /// the loop alive, if a session was lost since the attempt started.
    fn finish_success(&self) -> bool {
        let Ok(mut flags) = self.flags.lock() else {
            return true;
        };
        if std::mem::take(&mut flags.lost_again) {
            return false;
        }
        flags.running = false;
        self.attempt.store(0, Ordering::SeqCst);
        true
    }

    fn forget_loss(&self) {
        if let Ok(mut flags) = self.flags.lock() {
            flags.lost_again = false;
        }
    }

    fn give_up(&self) {
        if let Ok(mut flags) = self.flags.lock() {
            flags.running = false;
            flags.lost_again = false;
        }
    }
}

impl Reconnector {
    pub fn new(policy: ReconnectPolicy, state: Arc<watch::Sender<ConnectionState>>) -> Self {
        Self {
            policy,
            state,
            callback: Arc::new(Mutex::new(None)),
            progress: Arc::new(Progress::default()),
            task: Mutex::new(None),
        }
    }

    /// Store the callback used by later attempts. Last write wins, including
    /// while a loop is running.
    ///
    /// The callback runs inside the retry task. It must not call
    /// [`Reconnector::stop`] (directly or through `connect`/`disconnect`),
    /// since that cancels the task it is running on.
    pub fn set_callback(&self, callback: ReconnectCallback) {
        if let Ok(mut slot) = self.callback.lock() {
            *slot = Some(callback);
        }
    }

    /// Start the retry loop. `fallback` is used for any attempt made while no
    /// callback is registered.
    ///
    /// Returns `false` if a loop is already running. The loss is then noted,
    /// and a running loop whose current attempt succeeds starts over instead
    /// of finishing.
    pub fn start(&self, fallback: ReconnectCallback) -> bool {
        {
            let Ok(mut flags) = self.progress.flags.lock() else {
                return false;
            };
            if flags.running {
                flags.lost_again = true;
                tracing::debug!("Reconnect already in progress, loss noted");
                return false;
            }
            flags.running = true;
            flags.lost_again = false;
        }
        self.progress.attempt.store(0, Ordering::SeqCst);
        tracing::info!(max_attempts = self.policy.max_attempts, "Starting reconnect loop");

        let handle = tokio::spawn(run_loop(
            self.policy.clone(),
            self.state.clone(),
            self.callback.clone(),
            fallback,
            self.progress.clone(),
        ));

        if let Ok(mut task) = self.task.lock()
            && let Some(previous) = task.replace(handle)
        {
            previous.abort();
        }
        true
    }

    /// Cancel the loop, wait for it to finish and reset the attempt counter.
    /// Safe to call when no loop is running.
    pub async fn stop(&self) {
        let handle = self.task.lock().ok().and_then(|mut task| task.take());
        let was_running = match self.progress.flags.lock() {
            Ok(mut flags) => {
                flags.lost_again = false;
                std::mem::take(&mut flags.running)
            }
            Err(_) => false,
        };
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        self.progress.attempt.store(0, Ordering::SeqCst);
        if was_running {
            tracing::info!("Reconnect loop stopped");
        }
    }

    pub fn is_reconnecting(&self) -> bool {
        self.progress.is_running()
    }

    /// Attempt currently in flight (1-based), or 0 when idle or after success.
    pub fn current_attempt(&self) -> u32 {
        self.progress.attempt.load(Ordering::SeqCst)
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}

async fn run_loop(
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ConnectionState>>,
    slot: Arc<Mutex<Option<ReconnectCallback>>>,
    fallback: ReconnectCallback,
    progress: Arc<Progress>,
) {
    let max_attempts = policy.max_attempts;

    let mut attempt = 1;
    while attempt <= max_attempts {
        progress.attempt.store(attempt, Ordering::SeqCst);
        let delay = policy.delay(attempt);
        tracing::info!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnect attempt scheduled"
        );

        tokio::time::sleep(delay).await;

        let callback = slot
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .unwrap_or_else(|| fallback.clone());

        state.send_replace(ConnectionState::Connecting);
        match callback().await {
            Ok(()) => {
                if !progress.finish_success() {
                    tracing::warn!(attempt, "Session lost again right after reconnecting");
                    attempt = 1;
                    continue;
                }
                tracing::info!(attempt, "Reconnected");
                state.send_if_modified(|current| {
                    if *current == ConnectionState::Connecting {
                        *current = ConnectionState::Connected;
                        true
                    } else {
                        false
                    }
                });
                return;
            }
            Err(e) => {
                // The loop goes on regardless of any loss noted meanwhile.
                progress.forget_loss();
                tracing::warn!(attempt, max_attempts, error = %e, "Reconnect attempt failed");
                state.send_replace(ConnectionState::Error(e.to_string()));
            }
        }
        attempt += 1;
    }

    tracing::error!(max_attempts, "Giving up on reconnect");
    progress.give_up();
    state.send_replace(ConnectionState::Error(
        ClientError::ExhaustedRetries.to_string(),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::Instant;

    fn setup() -> (Reconnector, watch::Receiver<ConnectionState>) {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        (Reconnector::new(ReconnectPolicy::default(), Arc::new(tx)), rx)
    }

    /// Callback that fails until it has been called `succeed_on` times.
    fn counting(calls: Arc<AtomicUsize>, succeed_on: usize) -> ReconnectCallback {
        Arc::new(move || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= succeed_on {
                    Ok(())
                } else {
                    Err(ClientError::Callback(format!("attempt {} refused", n)))
                }
            }
            .boxed()
        })
    }

    fn never() -> ReconnectCallback {
        Arc::new(|| async { Err::<(), _>(ClientError::NoTarget) }.boxed())
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let (reconnector, rx) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        reconnector.set_callback(counting(calls.clone(), usize::MAX));

        assert!(reconnector.start(never()));
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(!reconnector.is_reconnecting());
        assert_eq!(
            *rx.borrow(),
            ConnectionState::Error("max attempts exceeded".into())
        );

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_attempt_counter() {
        let (reconnector, rx) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        reconnector.set_callback(counting(calls.clone(), 3));

        reconnector.start(never());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(reconnector.current_attempt(), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(reconnector.current_attempt(), 0);
        assert!(!reconnector.is_reconnecting());
        assert_eq!(*rx.borrow(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_follow_backoff_schedule() {
        let (reconnector, _rx) = setup();
        let started = Instant::now();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        reconnector.set_callback(Arc::new(move || {
            log.lock().unwrap().push(started.elapsed().as_millis() as u64);
            async { Err::<(), _>(ClientError::NotConnected) }.boxed()
        }));

        reconnector.start(never());
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![1_000, 3_000, 7_000, 15_000, 31_000]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_ignored() {
        let (reconnector, _rx) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        reconnector.set_callback(counting(calls.clone(), usize::MAX));

        assert!(reconnector.start(never()));
        assert!(!reconnector.start(never()));
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_wait() {
        let (reconnector, _rx) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        reconnector.set_callback(counting(calls.clone(), usize::MAX));

        reconnector.start(never());
        tokio::time::sleep(Duration::from_millis(500)).await;
        reconnector.stop().await;
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(reconnector.current_attempt(), 0);
        assert!(!reconnector.is_reconnecting());

        // Stopping again is harmless.
        reconnector.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn loss_during_successful_attempt_restarts_loop() {
        let (reconnector, rx) = setup();
        let reconnector = Arc::new(reconnector);
        let handle = Arc::downgrade(&reconnector);
        let calls = Arc::new(AtomicUsize::new(0));
        let ignored_starts = Arc::new(AtomicUsize::new(0));

        let (counter, ignored) = (calls.clone(), ignored_starts.clone());
        reconnector.set_callback(Arc::new(move || {
            // The first session dies before the attempt reports success.
            if counter.fetch_add(1, Ordering::SeqCst) == 0
                && let Some(reconnector) = handle.upgrade()
                && !reconnector.start(never())
            {
                ignored.fetch_add(1, Ordering::SeqCst);
            }
            async { Ok::<(), ClientError>(()) }.boxed()
        }));

        reconnector.start(never());
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ignored_starts.load(Ordering::SeqCst), 1);
        assert!(reconnector.is_reconnecting());
        assert_eq!(reconnector.current_attempt(), 1);

        // Starts over at delay(1).
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!reconnector.is_reconnecting());
        assert_eq!(reconnector.current_attempt(), 0);
        assert_eq!(*rx.borrow(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn loss_noted_before_failed_attempt_is_not_replayed() {
        let (reconnector, _rx) = setup();
        let reconnector = Arc::new(reconnector);
        let handle = Arc::downgrade(&reconnector);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        reconnector.set_callback(Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1
                && let Some(reconnector) = handle.upgrade()
            {
                reconnector.start(never());
            }
            async move {
                if n == 1 {
                    Err(ClientError::NotConnected)
                } else {
                    Ok(())
                }
            }
            .boxed()
        }));

        reconnector.start(never());
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!reconnector.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_used_without_callback() {
        let (reconnector, _rx) = setup();
        let calls = Arc::new(AtomicUsize::new(0));

        reconnector.start(counting(calls.clone(), 1));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!reconnector.is_reconnecting());
    }
}
