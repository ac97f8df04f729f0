/// Monitor core: pauses torrents while playback sessions are active.
///
/// A trigger (`notify_session_start`) pauses torrents and starts a single
/// background poll task. Each poll tick asks the media server for the
/// session count and applies the threshold rule. The task ends when a tick
/// sees zero sessions or when shutdown is requested.
///
/// All reads and writes of [`MonitorState`] happen under one async mutex,
/// which is also held across the outbound pause/resume call so that
/// check, call and update form a single step.
use crate::clients::{ClientError, SessionSource, TorrentControl};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Authoritative view of the sessions and torrents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorState {
    /// A monitoring episode is in progress (poll task alive).
    pub sessions_active: bool,
    /// Torrents were last successfully paused.
    pub torrents_paused: bool,
}

/// Tunables for the threshold rule and poll cadence.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    /// Minimum concurrent sessions that justify pausing torrents.
    pub threshold: u32,
    pub poll_interval: Duration,
}

/// Action chosen by [`decide`] for one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentAction {
    Pause,
    Resume,
}

/// Threshold rule. Pause and resume share the same boundary (no hysteresis).
pub fn decide(torrents_paused: bool, count: u32, threshold: u32) -> Option<TorrentAction> {
    if torrents_paused && count < threshold {
        Some(TorrentAction::Resume)
    } else if !torrents_paused && count >= threshold {
        Some(TorrentAction::Pause)
    } else {
        None
    }
}

struct Shared {
    state: MonitorState,
    poll_task: Option<JoinHandle<()>>,
}

struct Inner {
    shared: Mutex<Shared>,
    sessions: Arc<dyn SessionSource>,
    torrents: Arc<dyn TorrentControl>,
    settings: MonitorSettings,
    shutdown: CancellationToken,
}

/// Cheaply cloneable handle to the monitor core.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    pub fn new(
        sessions: Arc<dyn SessionSource>,
        torrents: Arc<dyn TorrentControl>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    state: MonitorState::default(),
                    poll_task: None,
                }),
                sessions,
                torrents,
                settings,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Token cancelled by [`Monitor::shutdown`]; the HTTP listener waits on it.
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    #[cfg(test)]
    pub(crate) async fn state(&self) -> MonitorState {
        self.inner.shared.lock().await.state
    }

    /// A playback session started. Idempotent while an episode is running.
    pub async fn notify_session_start(&self) {
        let mut shared = self.inner.shared.lock().await;

        if self.inner.shutdown.is_cancelled() {
            tracing::debug!("session start ignored, shutting down");
            return;
        }
        if shared.state.sessions_active {
            tracing::debug!("session start ignored, already monitoring");
            return;
        }

        tracing::info!("session start");
        shared.state.sessions_active = true;
        self.inner.pause_torrents(&mut shared.state).await;

        let inner = Arc::clone(&self.inner);
        shared.poll_task = Some(tokio::spawn(run_poll_loop(inner)));
    }

    #[cfg(test)]
    pub(crate) async fn evaluate_sessions(&self, count: u32) -> bool {
        self.inner.evaluate_sessions(count).await
    }

    /// Stop polling and the HTTP listener, then wait for the poll task.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let task = self.inner.shared.lock().await.poll_task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "poll task failed");
            }
        }
        tracing::debug!("monitor stopped");
    }
}

impl Inner {
    async fn pause_torrents(&self, state: &mut MonitorState) {
        if state.torrents_paused {
            return;
        }
        tracing::info!("pausing torrents");
        match self.torrents.set_torrent_state(true).await {
            Ok(()) => state.torrents_paused = true,
            Err(e) => tracing::error!(error = %e, "failed to pause torrents"),
        }
    }

    async fn resume_torrents(&self, state: &mut MonitorState) {
        if !state.torrents_paused {
            return;
        }
        tracing::info!("resuming torrents");
        match self.torrents.set_torrent_state(false).await {
            Ok(()) => state.torrents_paused = false,
            Err(e) => tracing::error!(error = %e, "failed to resume torrents"),
        }
    }

    async fn evaluate_sessions(&self, count: u32) -> bool {
        let mut shared = self.shared.lock().await;
        let state = &mut shared.state;
        let threshold = self.settings.threshold;

        tracing::debug!(count, threshold, paused = state.torrents_paused, "evaluating sessions");
        match decide(state.torrents_paused, count, threshold) {
            Some(TorrentAction::Pause) => self.pause_torrents(state).await,
            Some(TorrentAction::Resume) => self.resume_torrents(state).await,
            None => {}
        }

        state.sessions_active = count > 0;
        if !state.sessions_active {
            tracing::info!("no active sessions, monitoring stopped");
        }
        state.sessions_active
    }

    /// One poll tick. A failed query leaves the state untouched.
    async fn poll_once(&self) -> bool {
        match self.sessions.session_count().await {
            Ok(count) => self.evaluate_sessions(count).await,
            Err(e) => {
                match &e {
                    ClientError::Unauthorized { .. } => {
                        tracing::error!(error = %e, "invalid media server api key")
                    }
                    _ => tracing::error!(error = %e, "failed to query sessions"),
                }
                self.shared.lock().await.state.sessions_active
            }
        }
    }
}

async fn run_poll_loop(inner: Arc<Inner>) {
    tracing::debug!(interval = ?inner.settings.poll_interval, "poll loop started");
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = tokio::time::sleep(inner.settings.poll_interval) => {}
        }
        if inner.shutdown.is_cancelled() {
            break;
        }
        if !inner.poll_once().await {
            break;
        }
    }
    tracing::debug!("poll loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Replays scripted session counts; repeats `fallback` once drained.
    struct FakeSessions {
        script: std::sync::Mutex<VecDeque<Result<u32, ClientError>>>,
        fallback: u32,
        calls: AtomicUsize,
    }

    impl FakeSessions {
        fn new(script: Vec<Result<u32, ClientError>>, fallback: u32) -> Arc<Self> {
            Arc::new(Self {
                script: std::sync::Mutex::new(script.into()),
                fallback,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionSource for FakeSessions {
        async fn session_count(&self) -> Result<u32, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or(Ok(self.fallback))
        }
    }

    /// Records every requested state; optionally fails.
    #[derive(Default)]
    struct FakeTorrents {
        calls: std::sync::Mutex<Vec<bool>>,
        fail: AtomicBool,
    }

    impl FakeTorrents {
        fn calls(&self) -> Vec<bool> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TorrentControl for FakeTorrents {
        async fn set_torrent_state(&self, paused: bool) -> Result<(), ClientError> {
            self.calls.lock().unwrap().push(paused);
            // Widen the window for racing callers.
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClientError::Status {
                    url: "http://fake/api/v2/torrents".to_string(),
                    status: StatusCode::SERVICE_UNAVAILABLE,
                });
            }
            Ok(())
        }
    }

    fn settings(poll_interval: Duration) -> MonitorSettings {
        MonitorSettings {
            threshold: 2,
            poll_interval,
        }
    }

    fn monitor(
        sessions: Arc<FakeSessions>,
        torrents: Arc<FakeTorrents>,
        poll_interval: Duration,
    ) -> Monitor {
        Monitor::new(sessions, torrents, settings(poll_interval))
    }

    fn state(sessions_active: bool, torrents_paused: bool) -> MonitorState {
        MonitorState {
            sessions_active,
            torrents_paused,
        }
    }

    async fn set_state(m: &Monitor, state: MonitorState) {
        m.inner.shared.lock().await.state = state;
    }

    /// Wait for the current poll task to finish on its own.
    async fn wait_for_idle(m: &Monitor) {
        let task = m.inner.shared.lock().await.poll_task.take();
        if let Some(task) = task {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("poll task did not finish")
                .unwrap();
        }
    }

    fn transport_failure() -> ClientError {
        ClientError::Status {
            url: "http://fake/Sessions".to_string(),
            status: StatusCode::BAD_GATEWAY,
        }
    }

    #[test]
    fn test_decide_threshold_rule() {
        assert_eq!(decide(true, 0, 2), Some(TorrentAction::Resume));
        assert_eq!(decide(true, 1, 2), Some(TorrentAction::Resume));
        assert_eq!(decide(true, 2, 2), None);
        assert_eq!(decide(false, 2, 2), Some(TorrentAction::Pause));
        assert_eq!(decide(false, 5, 2), Some(TorrentAction::Pause));
        assert_eq!(decide(false, 1, 2), None);
        assert_eq!(decide(false, 0, 2), None);
    }

    #[test]
    fn test_decide_threshold_of_one() {
        assert_eq!(decide(false, 1, 1), Some(TorrentAction::Pause));
        assert_eq!(decide(true, 0, 1), Some(TorrentAction::Resume));
    }

    #[tokio::test]
    async fn test_evaluate_paused_zero_sessions_goes_idle() {
        let torrents = Arc::new(FakeTorrents::default());
        let m = monitor(FakeSessions::new(vec![], 0), torrents.clone(), Duration::from_secs(60));
        set_state(&m, state(true, true)).await;

        assert!(!m.evaluate_sessions(0).await);
        assert_eq!(
            m.state().await,
            state(false, false)
        );
        assert_eq!(torrents.calls(), vec![false]);
    }

    #[tokio::test]
    async fn test_evaluate_unpaused_at_threshold_pauses() {
        let torrents = Arc::new(FakeTorrents::default());
        let m = monitor(FakeSessions::new(vec![], 0), torrents.clone(), Duration::from_secs(60));
        set_state(&m, state(true, false)).await;

        assert!(m.evaluate_sessions(2).await);
        assert_eq!(
            m.state().await,
            state(true, true)
        );
        assert_eq!(torrents.calls(), vec![true]);
    }

    #[tokio::test]
    async fn test_evaluate_paused_below_threshold_resumes_but_keeps_monitoring() {
        let torrents = Arc::new(FakeTorrents::default());
        let m = monitor(FakeSessions::new(vec![], 0), torrents.clone(), Duration::from_secs(60));
        set_state(&m, state(true, true)).await;

        assert!(m.evaluate_sessions(1).await);
        assert_eq!(
            m.state().await,
            state(true, false)
        );
        assert_eq!(torrents.calls(), vec![false]);
    }

    #[tokio::test]
    async fn test_evaluate_unpaused_below_threshold_makes_no_call() {
        let torrents = Arc::new(FakeTorrents::default());
        let m = monitor(FakeSessions::new(vec![], 0), torrents.clone(), Duration::from_secs(60));
        set_state(&m, state(true, false)).await;

        assert!(m.evaluate_sessions(1).await);
        assert_eq!(
            m.state().await,
            state(true, false)
        );
        assert!(torrents.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_pause_leaves_flag_unset() {
        let torrents = Arc::new(FakeTorrents::default());
        torrents.fail.store(true, Ordering::SeqCst);
        let m = monitor(FakeSessions::new(vec![], 0), torrents.clone(), Duration::from_secs(60));
        set_state(&m, state(true, false)).await;

        assert!(m.evaluate_sessions(3).await);
        assert!(!m.state().await.torrents_paused);

        // Next tick above threshold retries the pause.
        torrents.fail.store(false, Ordering::SeqCst);
        assert!(m.evaluate_sessions(3).await);
        assert!(m.state().await.torrents_paused);
        assert_eq!(torrents.calls(), vec![true, true]);
    }

    #[tokio::test]
    async fn test_failed_final_resume_ends_episode_still_paused() {
        let torrents = Arc::new(FakeTorrents::default());
        torrents.fail.store(true, Ordering::SeqCst);
        let m = monitor(FakeSessions::new(vec![], 0), torrents.clone(), Duration::from_secs(60));
        set_state(&m, state(true, true)).await;

        // Zero sessions ends the episode even though the resume failed.
        assert!(!m.evaluate_sessions(0).await);
        assert_eq!(m.state().await, state(false, true));
        assert_eq!(torrents.calls(), vec![false]);

        // The next episode's pause short-circuits; its ticks resume later.
        torrents.fail.store(false, Ordering::SeqCst);
        m.notify_session_start().await;
        assert_eq!(m.state().await, state(true, true));
        assert_eq!(torrents.calls(), vec![false]);

        m.shutdown().await;
    }

    #[tokio::test]
    async fn test_poll_failure_leaves_state_unchanged() {
        let torrents = Arc::new(FakeTorrents::default());
        let sessions = FakeSessions::new(vec![Err(transport_failure())], 0);
        let m = monitor(sessions.clone(), torrents.clone(), Duration::from_secs(60));
        let before = state(true, true);
        set_state(&m, before).await;

        assert!(m.inner.poll_once().await);
        assert_eq!(m.state().await, before);
        assert_eq!(sessions.calls(), 1);
        assert!(torrents.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_poll_is_not_fatal() {
        let torrents = Arc::new(FakeTorrents::default());
        let sessions = FakeSessions::new(
            vec![Err(ClientError::Unauthorized {
                url: "http://fake/Sessions".to_string(),
            })],
            0,
        );
        let m = monitor(sessions, torrents.clone(), Duration::from_secs(60));
        set_state(&m, state(true, false)).await;

        assert!(m.inner.poll_once().await);
        assert!(torrents.calls().is_empty());
    }

    #[tokio::test]
    async fn test_episode_runs_until_no_sessions() {
        let torrents = Arc::new(FakeTorrents::default());
        let sessions = FakeSessions::new(vec![Err(transport_failure()), Ok(2), Ok(1), Ok(0)], 0);
        let m = monitor(sessions.clone(), torrents.clone(), Duration::from_millis(10));

        m.notify_session_start().await;
        assert_eq!(
            m.state().await,
            state(true, true)
        );

        wait_for_idle(&m).await;

        // Pause on trigger, resume when the count drops below the threshold.
        assert_eq!(torrents.calls(), vec![true, false]);
        assert_eq!(sessions.calls(), 4);
        assert_eq!(m.state().await, MonitorState::default());
    }

    #[tokio::test]
    async fn test_new_episode_after_idle() {
        let torrents = Arc::new(FakeTorrents::default());
        let sessions = FakeSessions::new(vec![Ok(0)], 2);
        let m = monitor(sessions, torrents.clone(), Duration::from_millis(10));

        m.notify_session_start().await;
        wait_for_idle(&m).await;
        assert!(!m.state().await.sessions_active);

        m.notify_session_start().await;
        assert!(m.state().await.sessions_active);
        assert_eq!(torrents.calls(), vec![true, false, true]);

        m.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_triggers_pause_once() {
        let torrents = Arc::new(FakeTorrents::default());
        let sessions = FakeSessions::new(vec![], 3);
        let m = monitor(sessions, torrents.clone(), Duration::from_secs(60));

        for _ in 0..5 {
            m.notify_session_start().await;
        }

        assert_eq!(torrents.calls(), vec![true]);
        // The handle plus the single poll task's clone.
        assert_eq!(Arc::strong_count(&m.inner), 2);

        m.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_triggers_pause_once() {
        let torrents = Arc::new(FakeTorrents::default());
        let sessions = FakeSessions::new(vec![], 3);
        let m = monitor(sessions, torrents.clone(), Duration::from_secs(60));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = m.clone();
                tokio::spawn(async move { m.notify_session_start().await })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(torrents.calls(), vec![true]);
        assert_eq!(Arc::strong_count(&m.inner), 2);
        m.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_wakes_poll_wait_promptly() {
        let torrents = Arc::new(FakeTorrents::default());
        let sessions = FakeSessions::new(vec![], 3);
        let m = monitor(sessions.clone(), torrents, Duration::from_secs(3600));

        m.notify_session_start().await;
        tokio::time::timeout(Duration::from_secs(1), m.shutdown())
            .await
            .expect("shutdown should not wait out the poll interval");

        assert_eq!(sessions.calls(), 0);
        assert!(m.shutdown_signal().is_cancelled());
    }

    #[tokio::test]
    async fn test_no_polls_after_shutdown() {
        let torrents = Arc::new(FakeTorrents::default());
        let sessions = FakeSessions::new(vec![], 3);
        let m = monitor(sessions.clone(), torrents, Duration::from_millis(5));

        m.notify_session_start().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        m.shutdown().await;

        let after = sessions.calls();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sessions.calls(), after);
    }

    #[tokio::test]
    async fn test_trigger_after_shutdown_is_ignored() {
        let torrents = Arc::new(FakeTorrents::default());
        let m = monitor(FakeSessions::new(vec![], 3), torrents.clone(), Duration::from_secs(60));

        m.shutdown().await;
        m.notify_session_start().await;

        assert!(torrents.calls().is_empty());
        assert_eq!(m.state().await, MonitorState::default());
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_harmless() {
        let m = monitor(
            FakeSessions::new(vec![], 3),
            Arc::new(FakeTorrents::default()),
            Duration::from_secs(60),
        );
        m.notify_session_start().await;
        m.shutdown().await;
        m.shutdown().await;
    }
}
