use super::*;
use crate::collab::{
    AlertPresenter, CameraProbe, FaceMatcher, Frame, FrameSource, LockAction, ReferenceDescriptor,
};
use crate::config::WatchConfig;
use crate::event_log::capture;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct FakeCamera {
    unavailable: AtomicBool,
    frames_stopped: Arc<AtomicBool>,
    frames_hang: Arc<AtomicBool>,
    opens: AtomicU32,
    live: Arc<AtomicI32>,
}

struct FakeSource {
    frames_stopped: Arc<AtomicBool>,
    frames_hang: Arc<AtomicBool>,
    live: Arc<AtomicI32>,
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn read_frame(&mut self) -> Option<Frame> {
        if self.frames_hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        (!self.frames_stopped.load(Ordering::SeqCst)).then(|| Frame {
            width: 1,
            height: 1,
            data: vec![0],
        })
    }
}

impl Drop for FakeSource {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CameraProbe for FakeCamera {
    async fn is_accessible(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<Box<dyn FrameSource>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSource {
            frames_stopped: self.frames_stopped.clone(),
            frames_hang: self.frames_hang.clone(),
            live: self.live.clone(),
        }))
    }
}

enum Verdict {
    Match,
    Miss,
    Fail,
    Panic,
    /// Never answers
    Hang,
}

/// Plays back scripted verdicts, then keeps answering `fallback`
struct ScriptedMatcher {
    script: Mutex<VecDeque<Verdict>>,
    fallback: bool,
    calls: AtomicU32,
}

impl ScriptedMatcher {
    fn new(script: Vec<Verdict>, fallback: bool) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl FaceMatcher for ScriptedMatcher {
    async fn matches(&self, _frame: &Frame, _reference: &ReferenceDescriptor) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Verdict::Match) => Ok(true),
            Some(Verdict::Miss) => Ok(false),
            Some(Verdict::Fail) => anyhow::bail!("embedder crashed"),
            Some(Verdict::Panic) => panic!("matcher blew up"),
            Some(Verdict::Hang) => std::future::pending::<Result<bool>>().await,
            None => Ok(self.fallback),
        }
    }
}

#[derive(Default)]
struct CountingPresenter {
    shows: AtomicU32,
    refreshes: AtomicU32,
    hides: AtomicU32,
    visible: AtomicBool,
}

impl AlertPresenter for CountingPresenter {
    fn show(&self, _text: &str) -> Result<()> {
        self.shows.fetch_add(1, Ordering::SeqCst);
        self.visible.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn refresh(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn hide(&self) -> Result<()> {
        self.hides.fetch_add(1, Ordering::SeqCst);
        self.visible.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct CountingLock {
    calls: AtomicU32,
    fail: bool,
}

#[async_trait]
impl LockAction for CountingLock {
    async fn now(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("no session");
        }
        Ok(())
    }
}

struct Harness {
    camera: Arc<FakeCamera>,
    matcher: Arc<ScriptedMatcher>,
    presenter: Arc<CountingPresenter>,
    lock: Arc<CountingLock>,
    pause: Arc<PauseFlag>,
    control: Arc<WatchControl>,
    settings: WatchConfig,
}

impl Harness {
    fn new(max_attempts: u32, matcher: ScriptedMatcher) -> Self {
        Self::with_lock(max_attempts, matcher, CountingLock::default())
    }

    fn with_lock(max_attempts: u32, matcher: ScriptedMatcher, lock: CountingLock) -> Self {
        Self {
            camera: Arc::new(FakeCamera::default()),
            matcher: Arc::new(matcher),
            presenter: Arc::new(CountingPresenter::default()),
            lock: Arc::new(lock),
            pause: Arc::new(PauseFlag::new()),
            control: Arc::new(WatchControl::new()),
            settings: WatchConfig {
                camera_retry_delay_secs: 0,
                camera_alert_interval_secs: 30,
                max_attempts,
                success_cooldown_secs: 0,
                poll_interval_ms: 1,
                restart_delay_secs: 0,
                frame_timeout_ms: 10_000,
            },
        }
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            camera: self.camera.clone(),
            matcher: self.matcher.clone(),
            presenter: self.presenter.clone(),
            lock: self.lock.clone(),
        }
    }

    fn build(&self) -> PresenceWatchLoop {
        PresenceWatchLoop::new(
            self.collaborators(),
            Arc::new(ReferenceDescriptor::from_embedding(vec![1.0]).unwrap()),
            self.pause.clone(),
            self.control.clone(),
            self.settings.clone(),
            "Couldn't find employee in the frame!".to_string(),
        )
    }

    fn lock_calls(&self) -> u32 {
        self.lock.calls.load(Ordering::SeqCst)
    }

    fn live_sources(&self) -> i32 {
        self.camera.live.load(Ordering::SeqCst)
    }

    fn alert_visible(&self) -> bool {
        self.presenter.visible.load(Ordering::SeqCst)
    }
}

async fn steps(watch_loop: &mut PresenceWatchLoop, n: usize) {
    for _ in 0..n {
        watch_loop.step().await.unwrap();
    }
}

async fn wait_for(control: &WatchControl, want: impl Fn(PresenceState) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !want(control.state()) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_first_miss_raises_alert() {
    let h = Harness::new(100, ScriptedMatcher::new(Vec::new(), false));
    let mut watch_loop = h.build();
    assert_eq!(watch_loop.state(), PresenceState::WaitingForCamera);

    steps(&mut watch_loop, 1).await;
    assert_eq!(watch_loop.state(), PresenceState::Verifying);
    assert_eq!(h.live_sources(), 1);

    steps(&mut watch_loop, 1).await;
    assert_eq!(watch_loop.state(), PresenceState::Alerting(1));
    assert_eq!(h.presenter.shows.load(Ordering::SeqCst), 1);

    steps(&mut watch_loop, 2).await;
    assert_eq!(watch_loop.state(), PresenceState::Alerting(3));
    assert_eq!(h.presenter.shows.load(Ordering::SeqCst), 1);
    assert_eq!(h.presenter.refreshes.load(Ordering::SeqCst), 2);
    assert_eq!(h.control.state(), PresenceState::Alerting(3));
}

#[tokio::test]
async fn test_locks_after_max_consecutive_misses() {
    let h = Harness::new(3, ScriptedMatcher::new(Vec::new(), false));
    let mut watch_loop = h.build();

    // Acquire, then misses 1 and 2
    steps(&mut watch_loop, 3).await;
    assert_eq!(watch_loop.state(), PresenceState::Alerting(2));
    assert_eq!(h.lock_calls(), 0);

    steps(&mut watch_loop, 1).await;
    assert_eq!(watch_loop.state(), PresenceState::LockedOut);
    assert_eq!(h.lock_calls(), 1);
    assert!(!h.alert_visible());
    assert_eq!(h.live_sources(), 0);

    // Idles without locking again
    steps(&mut watch_loop, 5).await;
    assert_eq!(watch_loop.state(), PresenceState::LockedOut);
    assert_eq!(h.lock_calls(), 1);
    assert_eq!(h.matcher.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_match_on_last_allowed_attempt_resets() {
    let h = Harness::new(
        3,
        ScriptedMatcher::new(vec![Verdict::Miss, Verdict::Miss, Verdict::Match], false),
    );
    let mut watch_loop = h.build();

    steps(&mut watch_loop, 3).await;
    assert_eq!(watch_loop.state(), PresenceState::Alerting(2));

    steps(&mut watch_loop, 1).await;
    assert_eq!(watch_loop.state(), PresenceState::WaitingForCamera);
    assert_eq!(watch_loop.state().retry_count(), 0);
    assert_eq!(h.lock_calls(), 0);
    assert!(!h.alert_visible());
    assert_eq!(h.live_sources(), 0);

    // The next miss starts counting from one again
    steps(&mut watch_loop, 2).await;
    assert_eq!(watch_loop.state(), PresenceState::Alerting(1));
    assert_eq!(h.lock_calls(), 0);
}

#[tokio::test]
async fn test_single_attempt_budget_locks_on_first_miss() {
    let h = Harness::new(1, ScriptedMatcher::new(Vec::new(), false));
    let mut watch_loop = h.build();

    steps(&mut watch_loop, 2).await;
    assert_eq!(watch_loop.state(), PresenceState::LockedOut);
    assert_eq!(h.lock_calls(), 1);
    assert_eq!(h.presenter.shows.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_success_releases_camera() {
    let h = Harness::new(100, ScriptedMatcher::new(Vec::new(), true));
    let mut watch_loop = h.build();

    steps(&mut watch_loop, 2).await;
    assert_eq!(watch_loop.state(), PresenceState::WaitingForCamera);
    assert_eq!(h.live_sources(), 0);
    assert_eq!(h.presenter.shows.load(Ordering::SeqCst), 0);

    steps(&mut watch_loop, 2).await;
    assert_eq!(h.camera.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_pause_during_alert_abandons_it() {
    let h = Harness::new(3, ScriptedMatcher::new(Vec::new(), false));
    let mut watch_loop = h.build();

    steps(&mut watch_loop, 3).await;
    assert_eq!(watch_loop.state(), PresenceState::Alerting(2));

    h.pause.set();
    steps(&mut watch_loop, 1).await;
    assert_eq!(watch_loop.state(), PresenceState::Paused);
    assert!(!h.alert_visible());
    assert_eq!(h.live_sources(), 0);

    steps(&mut watch_loop, 3).await;
    assert_eq!(watch_loop.state(), PresenceState::Paused);
    assert_eq!(h.lock_calls(), 0);
    assert_eq!(h.matcher.calls.load(Ordering::SeqCst), 2);

    h.pause.clear();
    steps(&mut watch_loop, 1).await;
    assert_eq!(watch_loop.state(), PresenceState::WaitingForCamera);

    // Escalation starts over after the pause
    steps(&mut watch_loop, 3).await;
    assert_eq!(watch_loop.state(), PresenceState::Alerting(2));
    assert_eq!(h.lock_calls(), 0);
}

#[tokio::test]
async fn test_manual_pause_and_resume() {
    let h = Harness::new(100, ScriptedMatcher::new(Vec::new(), true));
    let mut watch_loop = h.build();

    assert!(h.control.pause());
    steps(&mut watch_loop, 2).await;
    assert_eq!(watch_loop.state(), PresenceState::Paused);
    assert_eq!(h.camera.opens.load(Ordering::SeqCst), 0);

    assert!(h.control.resume());
    steps(&mut watch_loop, 2).await;
    assert_eq!(watch_loop.state(), PresenceState::Verifying);
}

#[tokio::test]
async fn test_frame_loss_reacquires_without_counting() {
    let h = Harness::new(100, ScriptedMatcher::new(Vec::new(), false));
    let mut watch_loop = h.build();

    steps(&mut watch_loop, 3).await;
    assert_eq!(watch_loop.state(), PresenceState::Alerting(2));

    h.camera.frames_stopped.store(true, Ordering::SeqCst);
    steps(&mut watch_loop, 1).await;
    assert_eq!(watch_loop.state(), PresenceState::WaitingForCamera);
    assert!(!h.alert_visible());
    assert_eq!(h.live_sources(), 0);
    assert_eq!(h.matcher.calls.load(Ordering::SeqCst), 2);

    h.camera.frames_stopped.store(false, Ordering::SeqCst);
    steps(&mut watch_loop, 2).await;
    assert_eq!(watch_loop.state(), PresenceState::Alerting(1));
}

#[tokio::test]
async fn test_unavailable_camera_keeps_waiting() {
    let h = Harness::new(100, ScriptedMatcher::new(Vec::new(), true));
    h.camera.unavailable.store(true, Ordering::SeqCst);
    let mut watch_loop = h.build();

    steps(&mut watch_loop, 3).await;
    assert_eq!(watch_loop.state(), PresenceState::WaitingForCamera);
    assert_eq!(h.camera.opens.load(Ordering::SeqCst), 0);

    h.camera.unavailable.store(false, Ordering::SeqCst);
    steps(&mut watch_loop, 1).await;
    assert_eq!(watch_loop.state(), PresenceState::Verifying);
}

#[tokio::test]
async fn test_lockout_waits_for_external_unlock() {
    let h = Harness::with_lock(
        2,
        ScriptedMatcher::new(Vec::new(), false),
        CountingLock {
            fail: true,
            ..CountingLock::default()
        },
    );
    let mut watch_loop = h.build();

    steps(&mut watch_loop, 3).await;
    // A failing lock command still ends in lockout
    assert_eq!(watch_loop.state(), PresenceState::LockedOut);
    assert_eq!(h.lock_calls(), 1);

    // Session locks, then unlocks
    h.pause.set();
    steps(&mut watch_loop, 1).await;
    assert_eq!(watch_loop.state(), PresenceState::Paused);
    h.pause.clear();
    steps(&mut watch_loop, 1).await;
    assert_eq!(watch_loop.state(), PresenceState::WaitingForCamera);
}

#[tokio::test]
async fn test_unlock_seen_only_through_epoch_leaves_lockout() {
    let h = Harness::new(1, ScriptedMatcher::new(Vec::new(), false));
    let mut watch_loop = h.build();

    steps(&mut watch_loop, 2).await;
    assert_eq!(watch_loop.state(), PresenceState::LockedOut);

    h.pause.clear();
    steps(&mut watch_loop, 1).await;
    assert_eq!(watch_loop.state(), PresenceState::WaitingForCamera);
}

#[tokio::test]
async fn test_matcher_failure_is_returned() {
    let h = Harness::new(100, ScriptedMatcher::new(vec![Verdict::Fail], true));
    let mut watch_loop = h.build();

    steps(&mut watch_loop, 1).await;
    assert!(matches!(
        watch_loop.step().await,
        Err(WatchError::Matcher(_))
    ));
}

#[tokio::test]
async fn test_silent_matcher_times_out() {
    let mut h = Harness::new(100, ScriptedMatcher::new(vec![Verdict::Hang], true));
    h.settings.frame_timeout_ms = 50;
    let mut watch_loop = h.build();

    steps(&mut watch_loop, 1).await;
    let started = Instant::now();
    assert!(matches!(
        watch_loop.step().await,
        Err(WatchError::MatcherTimeout(limit)) if limit == Duration::from_millis(50)
    ));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(h.lock_calls(), 0);
}

#[tokio::test]
async fn test_stalled_frame_read_counts_as_frame_loss() {
    let mut h = Harness::new(100, ScriptedMatcher::new(Vec::new(), false));
    h.settings.frame_timeout_ms = 50;
    let mut watch_loop = h.build();

    steps(&mut watch_loop, 2).await;
    assert_eq!(watch_loop.state(), PresenceState::Alerting(1));

    h.camera.frames_hang.store(true, Ordering::SeqCst);
    steps(&mut watch_loop, 1).await;
    assert_eq!(watch_loop.state(), PresenceState::WaitingForCamera);
    assert!(!h.alert_visible());
    assert_eq!(h.live_sources(), 0);
    assert_eq!(h.matcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pause_interrupts_silent_matcher() {
    let h = Harness::new(100, ScriptedMatcher::new(vec![Verdict::Hang], true));
    let mut watch_loop = h.build();
    let handle = tokio::spawn(async move { watch_loop.run().await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.matcher.calls.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    // Frame timeout is 10s, the pause must land well before it
    h.pause.set();
    wait_for(&h.control, |s| s == PresenceState::Paused).await;
    assert_eq!(h.live_sources(), 0);

    h.control.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_camera_outage_records_each_threshold_once() {
    capture::start();
    let mut h = Harness::new(100, ScriptedMatcher::new(Vec::new(), true));
    h.settings.camera_alert_interval_secs = 1;
    h.camera.unavailable.store(true, Ordering::SeqCst);
    let mut watch_loop = h.build();

    steps(&mut watch_loop, 5).await;
    assert_eq!(capture::take(), vec!["WARN - Camera inaccessible"]);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    steps(&mut watch_loop, 5).await;
    assert_eq!(
        capture::take(),
        vec!["WARN - Camera inaccessible for over 1 seconds."]
    );

    h.camera.unavailable.store(false, Ordering::SeqCst);
    steps(&mut watch_loop, 1).await;
    assert_eq!(watch_loop.state(), PresenceState::Verifying);
    assert_eq!(
        capture::take(),
        vec!["INFO - Camera accessible again after 1s"]
    );
}

#[tokio::test]
async fn test_first_acquisition_closes_earlier_downtime() {
    capture::start();
    let h = Harness::new(100, ScriptedMatcher::new(Vec::new(), true));
    let mut watch_loop = h.build();

    steps(&mut watch_loop, 1).await;
    assert_eq!(capture::take(), vec!["INFO - Camera accessible again"]);

    // Match, then a second acquisition of the same run
    steps(&mut watch_loop, 2).await;
    assert_eq!(watch_loop.state(), PresenceState::Verifying);
    assert!(capture::take().is_empty());
}

#[tokio::test]
async fn test_run_releases_everything_on_shutdown() {
    let h = Harness::new(u32::MAX, ScriptedMatcher::new(Vec::new(), false));
    let mut watch_loop = h.build();
    let handle = tokio::spawn(async move { watch_loop.run().await });

    wait_for(&h.control, |s| s.retry_count() >= 5).await;
    h.control.shutdown();
    handle.await.unwrap().unwrap();

    assert!(!h.alert_visible());
    assert_eq!(h.live_sources(), 0);
    assert_eq!(h.lock_calls(), 0);
}

#[tokio::test]
async fn test_run_pauses_within_a_poll() {
    let h = Harness::new(u32::MAX, ScriptedMatcher::new(Vec::new(), false));
    let mut watch_loop = h.build();
    let handle = tokio::spawn(async move { watch_loop.run().await });

    wait_for(&h.control, |s| s.retry_count() >= 3).await;
    h.pause.set();
    wait_for(&h.control, |s| s == PresenceState::Paused).await;
    assert!(!h.alert_visible());
    assert_eq!(h.lock_calls(), 0);

    h.control.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_supervisor_restarts_after_error() {
    let h = Harness::new(
        100,
        ScriptedMatcher::new(vec![Verdict::Fail, Verdict::Miss], true),
    );
    let factory = {
        let collab = h.collaborators();
        let pause = h.pause.clone();
        let control = h.control.clone();
        let settings = h.settings.clone();
        move || {
            PresenceWatchLoop::new(
                collab.clone(),
                Arc::new(ReferenceDescriptor::from_embedding(vec![1.0]).unwrap()),
                pause.clone(),
                control.clone(),
                settings.clone(),
                "alert".to_string(),
            )
        }
    };
    let handle = tokio::spawn(supervise(factory, h.control.clone(), Duration::ZERO));

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.matcher.calls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    h.control.shutdown();
    handle.await.unwrap();
    assert_eq!(h.live_sources(), 0);
    assert!(!h.alert_visible());
}

#[tokio::test]
async fn test_supervisor_survives_panic() {
    let h = Harness::new(100, ScriptedMatcher::new(vec![Verdict::Panic], true));
    let factory = {
        let collab = h.collaborators();
        let pause = h.pause.clone();
        let control = h.control.clone();
        let settings = h.settings.clone();
        move || {
            PresenceWatchLoop::new(
                collab.clone(),
                Arc::new(ReferenceDescriptor::from_embedding(vec![1.0]).unwrap()),
                pause.clone(),
                control.clone(),
                settings.clone(),
                "alert".to_string(),
            )
        }
    };
    let handle = tokio::spawn(supervise(factory, h.control.clone(), Duration::ZERO));

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.matcher.calls.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    h.control.shutdown();
    handle.await.unwrap();
    // The panicked run's camera handle was dropped during unwinding
    assert_eq!(h.live_sources(), 0);
}
