use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::model::AccelerationSample;

/// Capacity of the sample delivery channel. At the 100ms sampling interval
/// this buffers ~10s of backlog before samples are dropped.
pub const SAMPLE_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("motion sensor unavailable")]
    Unavailable,
}

/// Source of timestamped 3-axis acceleration samples.
pub trait MotionSensorSource: Send + Sync {
    /// Whether the underlying hardware can deliver samples at all.
    fn is_available(&self) -> bool;

    /// Begin delivery at roughly `interval`. Samples arrive on a bounded
    /// FIFO channel; dropping the receiver ends the subscription.
    fn subscribe(
        &self,
        interval: Duration,
    ) -> Result<mpsc::Receiver<AccelerationSample>, SensorError>;
}

/// Production source: whatever feeds `ingest` (the WebSocket handler, in
/// this service) becomes the sensor stream.
pub struct StreamSensorSource {
    feed: Mutex<Option<mpsc::Sender<AccelerationSample>>>,
}

impl StreamSensorSource {
    pub fn new() -> Self {
        Self {
            feed: Mutex::new(None),
        }
    }

    /// Push one sample toward the engine. Never blocks: with no active
    /// subscription, or with the channel full, the sample is dropped.
    pub fn ingest(&self, sample: AccelerationSample) -> bool {
        let guard = self.feed.lock().expect("sensor feed lock poisoned");
        match guard.as_ref() {
            Some(tx) => match tx.try_send(sample) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::debug!("sample channel full, dropping sample");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
            None => false,
        }
    }
}

impl Default for StreamSensorSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionSensorSource for StreamSensorSource {
    fn is_available(&self) -> bool {
        true
    }

    fn subscribe(
        &self,
        _interval: Duration,
    ) -> Result<mpsc::Receiver<AccelerationSample>, SensorError> {
        // The device on the far side of the socket controls the actual
        // rate; the interval is advisory for this source. Re-subscribing
        // replaces the previous feed.
        let (tx, rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
        *self.feed.lock().expect("sensor feed lock poisoned") = Some(tx);
        Ok(rx)
    }
}
