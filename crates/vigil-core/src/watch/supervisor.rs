use std::sync::Arc;
use std::time::Duration;

use super::{PresenceWatchLoop, WatchControl};

/// Keep a presence watch loop running until shutdown.
///
/// Each run happens in its own task so a panic is contained. After a failure
/// the loop is rebuilt with `make_loop` and restarted once `restart_delay`
/// has passed.
pub async fn supervise<F>(make_loop: F, control: Arc<WatchControl>, restart_delay: Duration)
where
    F: Fn() -> PresenceWatchLoop + Send + Sync + 'static,
{
    loop {
        if control.is_shutdown() {
            break;
        }

        let mut watch_loop = make_loop();
        let outcome = tokio::spawn(async move { watch_loop.run().await }).await;

        match outcome {
            Ok(Ok(())) => break,
            Ok(Err(e)) => log::error!("Presence watch loop failed: {e}"),
            Err(e) if e.is_panic() => log::error!("Presence watch loop panicked"),
            Err(e) => log::error!("Presence watch loop task failed: {e}"),
        }

        if control.is_shutdown() {
            break;
        }
        log::info!(
            "Restarting presence watch loop in {}s",
            restart_delay.as_secs()
        );
        sleep_until_shutdown(&control, restart_delay).await;
    }
    log::debug!("Presence watch supervisor stopped");
}

async fn sleep_until_shutdown(control: &WatchControl, total: Duration) {
    let step = Duration::from_millis(100);
    let deadline = tokio::time::Instant::now() + total;
    while !control.is_shutdown() {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep((deadline - now).min(step)).await;
    }
}
