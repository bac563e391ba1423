//! Background power sampling.
//!
//! A [`Sampler`] moves an [`Oscilloscope`] onto a worker thread that measures power at a
//! fixed interval and pushes timestamped samples into a bounded FIFO queue. The worker
//! blocks when the queue is full. A measurement error is delivered as the last item and ends
//! the worker. [`Sampler::stop`] joins the worker and hands the oscilloscope back.

use crate::error::{AppResult, DaqError};
use crate::instrument::InstrumentLink;
use crate::measurement::MeasurementSample;
use crate::oscilloscope::Oscilloscope;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct Sampler<L: InstrumentLink + Send + 'static> {
    receiver: mpsc::Receiver<AppResult<MeasurementSample>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Oscilloscope<L>>>,
}

impl<L: InstrumentLink + Send + 'static> Sampler<L> {
    /// Start sampling `v_channel`/`i_channel` every `interval`, buffering up to `capacity`
    /// samples.
    pub fn spawn(
        mut scope: Oscilloscope<L>,
        v_channel: u8,
        i_channel: u8,
        interval: Duration,
        capacity: usize,
    ) -> AppResult<Self> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = stop.clone();

        let handle = thread::Builder::new()
            .name("power-sampler".to_string())
            .spawn(move || {
                info!(v_channel, i_channel, ?interval, "Sampler started");
                while !worker_stop.load(Ordering::Acquire) {
                    let item = scope.sample(v_channel, i_channel);
                    let failed = item.is_err();
                    if let Err(e) = &item {
                        warn!("Sampler measurement failed: {}", e);
                    }
                    if sender.blocking_send(item).is_err() {
                        debug!("Sample queue closed");
                        break;
                    }
                    if failed {
                        break;
                    }
                    if !interval.is_zero() {
                        thread::sleep(interval);
                    }
                }
                info!("Sampler stopped");
                scope
            })?;

        Ok(Self {
            receiver,
            stop,
            handle: Some(handle),
        })
    }

    /// Block until the next sample. `None` once the worker has finished and the queue is
    /// drained.
    pub fn recv(&mut self) -> Option<AppResult<MeasurementSample>> {
        self.receiver.blocking_recv()
    }

    /// Stop the worker and get the oscilloscope back. Queued samples are discarded.
    pub fn stop(mut self) -> AppResult<Oscilloscope<L>> {
        self.signal_stop();
        let handle = self
            .handle
            .take()
            .ok_or_else(|| DaqError::Instrument("sampler already stopped".to_string()))?;
        handle
            .join()
            .map_err(|_| DaqError::Instrument("sampler worker panicked".to_string()))
    }

    fn signal_stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // Wakes a worker blocked on a full queue.
        self.receiver.close();
    }
}

impl<L: InstrumentLink + Send + 'static> Drop for Sampler<L> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.signal_stop();
            if handle.join().is_err() {
                warn!("Sampler worker panicked");
            }
        }
    }
}
