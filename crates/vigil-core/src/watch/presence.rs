use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use vigil_analytics::EventKind;

use super::{PauseFlag, PresenceState, WatchControl, WatchError};
use crate::collab::{
    AlertPresenter, CameraProbe, FaceMatcher, FrameSource, LockAction, ReferenceDescriptor,
};
use crate::config::WatchConfig;
use crate::event_log::{record_event, record_event_with};

/// Everything the loop drives. Cheap to clone so a restarted loop reuses it.
#[derive(Clone)]
pub struct Collaborators {
    pub camera: Arc<dyn CameraProbe>,
    pub matcher: Arc<dyn FaceMatcher>,
    pub presenter: Arc<dyn AlertPresenter>,
    pub lock: Arc<dyn LockAction>,
}

/// Tracks one stretch of camera unavailability
struct Downtime {
    since: Instant,
    step: Duration,
    next_alert: Duration,
}

impl Downtime {
    fn new(step: Duration) -> Self {
        Self {
            since: Instant::now(),
            step,
            next_alert: step,
        }
    }

    /// Thresholds crossed since the last call, each reported once
    fn crossed(&mut self) -> Vec<Duration> {
        let elapsed = self.since.elapsed();
        let mut crossed = Vec::new();
        while !self.step.is_zero() && elapsed >= self.next_alert {
            crossed.push(self.next_alert);
            self.next_alert += self.step;
        }
        crossed
    }
}

/// How a bounded collaborator call ended
enum Guarded<T> {
    Done(T),
    /// Pause or shutdown was requested while waiting
    Interrupted,
    TimedOut,
}

/// Await `fut` for at most `limit`, giving up as soon as the loop is paused
/// or shut down. The flags are checked once per `poll`.
async fn guarded<T>(
    fut: impl Future<Output = T>,
    limit: Duration,
    poll: Duration,
    pause: &PauseFlag,
    control: &WatchControl,
) -> Guarded<T> {
    tokio::pin!(fut);
    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);
    let mut ticks = tokio::time::interval(poll.max(Duration::from_millis(1)));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            value = &mut fut => return Guarded::Done(value),
            () = &mut deadline => return Guarded::TimedOut,
            _ = ticks.tick() => {
                if pause.is_set() || control.is_paused() || control.is_shutdown() {
                    return Guarded::Interrupted;
                }
            }
        }
    }
}

/// The presence verification state machine.
///
/// Each [`step`](Self::step) performs one transition. The camera is held only
/// between `WaitingForCamera -> Verifying` and the next return to
/// `WaitingForCamera`; dropping the loop releases it.
pub struct PresenceWatchLoop {
    collab: Collaborators,
    reference: Arc<ReferenceDescriptor>,
    pause: Arc<PauseFlag>,
    control: Arc<WatchControl>,
    settings: WatchConfig,
    alert_text: String,
    state: PresenceState,
    capture: Option<Box<dyn FrameSource>>,
    alert_visible: bool,
    downtime: Option<Downtime>,
    /// Set once this instance has had the camera at least once
    camera_seen: bool,
    locked_epoch: u64,
}

impl PresenceWatchLoop {
    #[must_use]
    pub fn new(
        collab: Collaborators,
        reference: Arc<ReferenceDescriptor>,
        pause: Arc<PauseFlag>,
        control: Arc<WatchControl>,
        settings: WatchConfig,
        alert_text: String,
    ) -> Self {
        Self {
            collab,
            reference,
            pause,
            control,
            settings,
            alert_text,
            state: PresenceState::WaitingForCamera,
            capture: None,
            alert_visible: false,
            downtime: None,
            camera_seen: false,
            locked_epoch: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> PresenceState {
        self.state
    }

    /// Run until shutdown is requested, releasing the camera and dismissing
    /// the alert on the way out.
    ///
    /// # Errors
    ///
    /// Returns an error if the face matcher fails; the supervisor restarts the loop.
    pub async fn run(&mut self) -> Result<(), WatchError> {
        // A previous run may have died with the alert up
        if let Err(e) = self.collab.presenter.hide() {
            log::warn!("Failed to dismiss stale alert: {e:#}");
        }
        self.control.publish(self.state);

        let result = loop {
            if self.control.is_shutdown() {
                break Ok(());
            }
            if let Err(e) = self.step().await {
                break Err(e);
            }
            tokio::task::yield_now().await;
        };

        self.release();
        result
    }

    /// Perform a single transition
    ///
    /// # Errors
    ///
    /// Returns an error if the face matcher fails
    pub async fn step(&mut self) -> Result<(), WatchError> {
        if self.is_suspended() {
            if self.state != PresenceState::Paused {
                self.release();
                log::info!("Presence checks paused");
                self.set_state(PresenceState::Paused);
            }
            tokio::time::sleep(self.settings.poll_interval()).await;
            return Ok(());
        }

        match self.state {
            PresenceState::Paused => {
                log::info!("Presence checks resumed");
                self.set_state(PresenceState::WaitingForCamera);
            }
            PresenceState::WaitingForCamera => self.acquire_camera().await,
            PresenceState::Verifying => self.check_frame(0).await?,
            PresenceState::Alerting(failed) => self.check_frame(failed).await?,
            PresenceState::LockedOut => self.wait_for_unlock().await,
        }
        Ok(())
    }

    fn is_suspended(&self) -> bool {
        self.pause.is_set() || self.control.is_paused()
    }

    fn set_state(&mut self, state: PresenceState) {
        self.state = state;
        self.control.publish(state);
    }

    async fn acquire_camera(&mut self) {
        let camera = self.collab.camera.clone();
        let attempt = async move {
            if !camera.is_accessible().await {
                return None;
            }
            match camera.open().await {
                Ok(source) => Some(source),
                Err(e) => {
                    log::debug!("Camera reported accessible but failed to open: {e:#}");
                    None
                }
            }
        };

        let limit = self.settings.frame_timeout();
        let source = match guarded(
            attempt,
            limit,
            self.settings.poll_interval(),
            &self.pause,
            &self.control,
        )
        .await
        {
            Guarded::Done(source) => source,
            Guarded::Interrupted => return,
            Guarded::TimedOut => {
                log::warn!("Camera did not answer within {limit:?}");
                None
            }
        };

        let Some(source) = source else {
            self.note_camera_down();
            self.sleep_unless_suspended(self.settings.camera_retry_delay())
                .await;
            return;
        };

        match self.downtime.take() {
            Some(downtime) => record_event_with(
                EventKind::CameraAccessible,
                &format!("after {}s", downtime.since.elapsed().as_secs()),
            ),
            // Closes a downtime a previous run or daemon left open
            None if !self.camera_seen => record_event(EventKind::CameraAccessible),
            None => {}
        }
        self.camera_seen = true;
        self.capture = Some(source);
        self.set_state(PresenceState::Verifying);
    }

    fn note_camera_down(&mut self) {
        match self.downtime.as_mut() {
            None => {
                record_event(EventKind::CameraInaccessible);
                self.downtime = Some(Downtime::new(self.settings.camera_alert_interval()));
            }
            Some(downtime) => {
                for threshold in downtime.crossed() {
                    record_event_with(
                        EventKind::CameraInaccessible,
                        &format!("for over {} seconds.", threshold.as_secs()),
                    );
                }
            }
        }
    }

    /// One verification attempt after `failed` consecutive misses
    async fn check_frame(&mut self, failed: u32) -> Result<(), WatchError> {
        let limit = self.settings.frame_timeout();
        let poll = self.settings.poll_interval();

        let read = match self.capture.as_mut() {
            Some(capture) => {
                guarded(capture.read_frame(), limit, poll, &self.pause, &self.control).await
            }
            None => Guarded::Done(None),
        };
        let frame = match read {
            Guarded::Done(Some(frame)) => frame,
            Guarded::Interrupted => return Ok(()),
            Guarded::Done(None) => {
                log::warn!("Camera stopped delivering frames, reacquiring");
                self.lose_frames();
                return Ok(());
            }
            Guarded::TimedOut => {
                log::warn!("No frame within {limit:?}, reacquiring");
                self.lose_frames();
                return Ok(());
            }
        };

        let verdict = guarded(
            self.collab.matcher.matches(&frame, &self.reference),
            limit,
            poll,
            &self.pause,
            &self.control,
        )
        .await;
        let matched = match verdict {
            Guarded::Done(result) => result.map_err(WatchError::Matcher)?,
            Guarded::Interrupted => return Ok(()),
            Guarded::TimedOut => return Err(WatchError::MatcherTimeout(limit)),
        };

        if matched {
            self.presence_confirmed().await;
            return Ok(());
        }

        let attempts = failed + 1;
        if attempts >= self.settings.max_attempts {
            self.lock_out().await;
            return Ok(());
        }

        let shown = if self.alert_visible {
            self.collab.presenter.refresh()
        } else {
            self.alert_visible = true;
            self.collab.presenter.show(&self.alert_text)
        };
        if let Err(e) = shown {
            log::warn!("Failed to display alert: {e:#}");
        }
        log::warn!(
            "Presence not confirmed (attempt {attempts}/{})",
            self.settings.max_attempts
        );
        self.set_state(PresenceState::Alerting(attempts));
        Ok(())
    }

    fn lose_frames(&mut self) {
        self.release();
        self.set_state(PresenceState::WaitingForCamera);
    }

    async fn presence_confirmed(&mut self) {
        self.release();
        log::info!("Presence verified");
        self.set_state(PresenceState::WaitingForCamera);
        self.sleep_unless_suspended(self.settings.success_cooldown())
            .await;
    }

    async fn lock_out(&mut self) {
        self.release();
        log::error!(
            "Presence not confirmed after {} attempts, locking workstation",
            self.settings.max_attempts
        );
        if let Err(e) = self.collab.lock.now().await {
            log::error!("Lock action failed: {e:#}");
        }
        self.locked_epoch = self.pause.unlock_epoch();
        self.set_state(PresenceState::LockedOut);
    }

    async fn wait_for_unlock(&mut self) {
        if self.pause.unlock_epoch() == self.locked_epoch {
            tokio::time::sleep(self.settings.poll_interval()).await;
            return;
        }
        log::info!("Workstation unlocked, resuming presence checks");
        self.set_state(PresenceState::WaitingForCamera);
    }

    /// Drop the capture stream and dismiss the alert
    fn release(&mut self) {
        self.capture = None;
        if self.alert_visible {
            self.alert_visible = false;
            if let Err(e) = self.collab.presenter.hide() {
                log::warn!("Failed to dismiss alert: {e:#}");
            }
        }
    }

    /// Sleep for `total`, waking at least once per poll interval to notice a
    /// pause or shutdown
    async fn sleep_unless_suspended(&mut self, total: Duration) {
        let poll = self.settings.poll_interval().max(Duration::from_millis(1));
        let deadline = tokio::time::Instant::now() + total;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline || self.is_suspended() || self.control.is_shutdown() {
                return;
            }
            tokio::time::sleep((deadline - now).min(poll)).await;
        }
    }
}
