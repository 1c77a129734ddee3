//! Delays that observe a monitor's `running` flag.
//!
//! Every rescheduled piece of work (the next block poll, the next bytecode attempt) waits through
//! [sleep_while_running], so once a monitor is stopped pending timers resolve immediately and nothing new is
//! scheduled. Work that is already awaiting the network is never interrupted.

use std::time::Duration;

use tokio::sync::watch;

/// Sleeps for `duration` unless `running` is or becomes false first. Returns whether the monitor is still running,
/// i.e. whether the caller may schedule more work. A dropped sender counts as stopped.
pub async fn sleep_while_running(running: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        if !*running.borrow_and_update() {
            return false;
        }
        tokio::select! {
            () = &mut sleep => return *running.borrow(),
            changed = running.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}
