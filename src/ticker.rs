//! Periodic ticker on a background thread.
//!
//! Runs a current-thread tokio runtime driving an interval, like the other
//! background workers: one thread per ticker, stopped through a oneshot.

use log::{debug, error};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;

/// Handle to a running ticker. Dropping it stops the ticker without waiting.
pub struct Ticker {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

/// Call `on_tick` every `period` until it returns false or the ticker is
/// stopped. The first call happens one full period after start.
pub fn start_ticker<F>(period: Duration, mut on_tick: F) -> Ticker
where
    F: FnMut() -> bool + Send + 'static,
{
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let handle = thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!("Failed to create ticker runtime: {}", e);
                return;
            }
        };

        rt.block_on(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        debug!("Ticker stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if !on_tick() {
                            debug!("Ticker target gone, exiting");
                            break;
                        }
                    }
                }
            }
        });
    });

    Ticker {
        stop_tx: Some(stop_tx),
        handle: Some(handle),
    }
}

impl Ticker {
    /// Stop the ticker and wait for its thread to exit.
    pub fn stop(mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Ticker thread panicked");
            }
        }
    }

    fn signal_stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            // Receiver is gone if the ticker already exited on its own.
            let _ = tx.send(());
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        // No join here: the last owner may be dropped on the ticker thread itself.
        self.signal_stop();
    }
}
