use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What the timer asks the supervisor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatSignal {
    /// Write a heartbeat carrying `sequence`.
    Beat { sequence: Option<u64> },
    /// The previous heartbeat was never acknowledged; the socket is dead.
    Zombied,
}

/// Per-connection heartbeat timer.
///
/// The first beat fires after a random fraction of the interval, then every
/// interval after that. Dropping the scheduler stops the task.
pub struct HeartbeatScheduler {
    acknowledged: Arc<AtomicBool>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatScheduler {
    #[must_use]
    pub fn start(
        interval: Duration,
        sequence: watch::Receiver<Option<u64>>,
        sender: mpsc::Sender<HeartbeatSignal>,
    ) -> Self {
        let jitter = rand::rng().random::<f64>();
        Self::start_with_jitter(interval, jitter, sequence, sender)
    }

    /// Starts with a fixed first-beat fraction in `[0, 1)`.
    #[must_use]
    pub fn start_with_jitter(
        interval: Duration,
        jitter: f64,
        sequence: watch::Receiver<Option<u64>>,
        sender: mpsc::Sender<HeartbeatSignal>,
    ) -> Self {
        let acknowledged = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let first_delay = interval.mul_f64(jitter.clamp(0.0, 1.0));
        let handle = tokio::spawn(run_heartbeat(
            interval,
            first_delay,
            sequence,
            sender,
            acknowledged.clone(),
            cancel.clone(),
        ));

        debug!(
            interval_ms = interval.as_millis(),
            first_delay_ms = first_delay.as_millis(),
            "Heartbeat started"
        );

        Self {
            acknowledged,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn acknowledge(&self) {
        self.acknowledged.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("Heartbeat stopped");
        }
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_heartbeat(
    interval: Duration,
    first_delay: Duration,
    sequence: watch::Receiver<Option<u64>>,
    sender: mpsc::Sender<HeartbeatSignal>,
    acknowledged: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + first_delay, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !acknowledged.swap(false, Ordering::SeqCst) {
            warn!("Heartbeat ACK not received, connection is zombied");
            let _ = sender.send(HeartbeatSignal::Zombied).await;
            break;
        }

        let current = *sequence.borrow();
        if sender
            .send(HeartbeatSignal::Beat { sequence: current })
            .await
            .is_err()
        {
            debug!("Heartbeat channel closed");
            break;
        }

        // The next beat is one interval after this one was handed over.
        ticker.reset();
    }

    debug!("Heartbeat loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(41_250);

    fn channels() -> (
        watch::Sender<Option<u64>>,
        watch::Receiver<Option<u64>>,
        mpsc::Sender<HeartbeatSignal>,
        mpsc::Receiver<HeartbeatSignal>,
    ) {
        let (seq_tx, seq_rx) = watch::channel(None);
        let (tx, rx) = mpsc::channel(8);
        (seq_tx, seq_rx, tx, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_beat_within_interval_then_fixed_spacing() {
        let (_seq_tx, seq_rx, tx, mut rx) = channels();
        let start = Instant::now();
        let scheduler = HeartbeatScheduler::start(INTERVAL, seq_rx, tx);

        assert_eq!(rx.recv().await, Some(HeartbeatSignal::Beat { sequence: None }));
        let first = Instant::now();
        assert!(first - start < INTERVAL);

        scheduler.acknowledge();
        assert!(matches!(rx.recv().await, Some(HeartbeatSignal::Beat { .. })));
        let second = Instant::now();
        assert_eq!(second - first, INTERVAL);

        scheduler.acknowledge();
        assert!(matches!(rx.recv().await, Some(HeartbeatSignal::Beat { .. })));
        assert_eq!(Instant::now() - second, INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_beat_carries_latest_sequence() {
        let (seq_tx, seq_rx, tx, mut rx) = channels();
        let scheduler = HeartbeatScheduler::start_with_jitter(INTERVAL, 0.5, seq_rx, tx);

        seq_tx.send_replace(Some(3));
        assert_eq!(
            rx.recv().await,
            Some(HeartbeatSignal::Beat { sequence: Some(3) })
        );

        scheduler.acknowledge();
        seq_tx.send_replace(Some(9));
        assert_eq!(
            rx.recv().await,
            Some(HeartbeatSignal::Beat { sequence: Some(9) })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_ack_reports_zombie_one_interval_later() {
        let (_seq_tx, seq_rx, tx, mut rx) = channels();
        let _scheduler = HeartbeatScheduler::start_with_jitter(INTERVAL, 0.0, seq_rx, tx);

        assert!(matches!(rx.recv().await, Some(HeartbeatSignal::Beat { .. })));
        let beat_at = Instant::now();

        assert_eq!(rx.recv().await, Some(HeartbeatSignal::Zombied));
        assert_eq!(Instant::now() - beat_at, INTERVAL);

        // The task ends after a zombie report.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_receiver_does_not_trigger_catch_up_ticks() {
        let (_seq_tx, seq_rx) = watch::channel(None);
        let (tx, mut rx) = mpsc::channel(1);
        let scheduler = HeartbeatScheduler::start_with_jitter(INTERVAL, 0.0, seq_rx, tx);

        tokio::time::sleep(INTERVAL / 2).await;
        scheduler.acknowledge();

        // The beat due at one interval waits on the full channel.
        tokio::time::sleep(INTERVAL * 3).await;
        assert!(matches!(rx.recv().await, Some(HeartbeatSignal::Beat { .. })));
        assert!(matches!(rx.recv().await, Some(HeartbeatSignal::Beat { .. })));
        let delivered = Instant::now();
        scheduler.acknowledge();

        assert!(matches!(rx.recv().await, Some(HeartbeatSignal::Beat { .. })));
        assert_eq!(Instant::now() - delivered, INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_ends_task() {
        let (_seq_tx, seq_rx, tx, mut rx) = channels();
        let mut scheduler = HeartbeatScheduler::start_with_jitter(INTERVAL, 0.1, seq_rx, tx);

        scheduler.stop();
        scheduler.stop();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_task() {
        let (_seq_tx, seq_rx, tx, mut rx) = channels();
        let scheduler = HeartbeatScheduler::start_with_jitter(INTERVAL, 0.1, seq_rx, tx);
        assert!(scheduler.is_acknowledged());

        drop(scheduler);
        assert_eq!(rx.recv().await, None);
    }
}
