/*!
Result sinks.

Finals travel over an unbounded channel: every completed cycle is delivered.
Previews travel over a bounded channel that never blocks the emitter; when
the consumer falls behind, the oldest preview is dropped in favour of the
newest.
*/

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use shared::ResultBundle;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Emitting side, owned by the composition engine
#[derive(Debug)]
pub struct ResultSink {
    preview_tx: Sender<ResultBundle>,
    // second handle on the preview queue, used to evict the oldest entry
    preview_evict: Receiver<ResultBundle>,
    final_tx: Sender<ResultBundle>,
    superseded: AtomicU64,
}

/// Consuming side handed to the application
#[derive(Debug, Clone)]
pub struct SinkReceiver {
    pub previews: Receiver<ResultBundle>,
    pub finals: Receiver<ResultBundle>,
}

/// Create a connected sink pair keeping at most `preview_capacity` previews
pub fn result_channels(preview_capacity: usize) -> (ResultSink, SinkReceiver) {
    let (preview_tx, previews) = bounded(preview_capacity.max(1));
    let (final_tx, finals) = unbounded();
    let sink = ResultSink {
        preview_tx,
        preview_evict: previews.clone(),
        final_tx,
        superseded: AtomicU64::new(0),
    };
    (sink, SinkReceiver { previews, finals })
}

impl ResultSink {
    /// Deliver a bundle without blocking
    pub fn emit(&self, bundle: ResultBundle) {
        if bundle.is_final() {
            if self.final_tx.send(bundle).is_err() {
                debug!("final bundle dropped, no receiver");
            }
            return;
        }

        let mut pending = bundle;
        loop {
            match self.preview_tx.try_send(pending) {
                Ok(()) => return,
                Err(TrySendError::Full(bundle)) => {
                    if self.preview_evict.try_recv().is_ok() {
                        self.superseded.fetch_add(1, Ordering::Relaxed);
                    }
                    pending = bundle;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Previews evicted before anyone read them
    pub fn superseded(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }
}

impl SinkReceiver {
    /// Wait for the next final bundle
    pub fn next_final(&self, timeout: Duration) -> Option<ResultBundle> {
        match self.finals.recv_timeout(timeout) {
            Ok(bundle) => Some(bundle),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything queued right now, previews first
    pub fn drain(&self) -> (Vec<ResultBundle>, Vec<ResultBundle>) {
        (self.previews.try_iter().collect(), self.finals.try_iter().collect())
    }
}
