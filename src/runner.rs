//! Minimal host run loop driving a [`Frontend`] on tokio timers.
//!
//! A real run-control framework owns the threads and the event transport.
//! [`RunControl`] plays that role in-process: while a run is active it polls
//! the frontend for events on one interval, calls the periodic hook on
//! another, and forwards every event as [`Bytes`] over a bounded channel.
//!
//! Readout applies backpressure: when the consumer falls behind, the readout
//! task waits on the channel instead of dropping events.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::FrontendSection;
use crate::error::{AppResult, DaqError};
use crate::frontend::Frontend;

/// Totals of one run as seen by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Run number
    pub run: u32,
    /// Events forwarded to the consumer
    pub events: u64,
    /// Bytes forwarded to the consumer
    pub bytes: u64,
}

/// Shortest timer period; tokio rejects zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

struct RunTasks {
    run: u32,
    cancel: watch::Sender<bool>,
    readout: JoinHandle<RunSummary>,
    maintenance: JoinHandle<()>,
}

/// Drives one frontend through runs.
pub struct RunControl {
    frontend: Arc<dyn Frontend>,
    poll_period: Duration,
    hot_reload_period: Duration,
    queue_capacity: usize,
    active: Option<RunTasks>,
}

impl RunControl {
    /// Host for `frontend` with timing from the `[frontend]` settings.
    pub fn new(frontend: Arc<dyn Frontend>, settings: &FrontendSection) -> Self {
        Self {
            frontend,
            poll_period: settings.poll_period.max(MIN_PERIOD),
            hot_reload_period: settings.hot_reload_period.max(MIN_PERIOD),
            queue_capacity: settings.event_queue_capacity.max(1),
            active: None,
        }
    }

    /// Initialize the frontend.
    pub fn initialize(&self) -> AppResult<()> {
        self.frontend.initialize()
    }

    /// Whether a run is active.
    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Start run `run` and return the event stream.
    ///
    /// The stream ends when the run is stopped.
    pub fn start_run(&mut self, run: u32) -> AppResult<mpsc::Receiver<Bytes>> {
        if let Some(active) = &self.active {
            return Err(DaqError::Configuration(format!(
                "run {} is still active",
                active.run
            )));
        }

        self.frontend.on_run_start(run)?;

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let (cancel, cancel_rx) = watch::channel(false);
        let readout = tokio::spawn(readout_loop(
            Arc::clone(&self.frontend),
            run,
            self.poll_period,
            tx,
            cancel_rx.clone(),
        ));
        let maintenance = tokio::spawn(maintenance_loop(
            Arc::clone(&self.frontend),
            self.hot_reload_period,
            cancel_rx,
        ));

        self.active = Some(RunTasks {
            run,
            cancel,
            readout,
            maintenance,
        });
        Ok(rx)
    }

    /// Suspend the active run; the stream stays open.
    pub fn pause_run(&self) -> AppResult<()> {
        match &self.active {
            Some(active) => self.frontend.on_run_pause(active.run),
            None => Ok(()),
        }
    }

    /// Continue the active run.
    pub fn resume_run(&self) -> AppResult<()> {
        match &self.active {
            Some(active) => self.frontend.on_run_resume(active.run),
            None => Ok(()),
        }
    }

    /// Stop the active run and wait for its tasks.
    ///
    /// Returns `None` when no run was active.
    pub async fn stop_run(&mut self) -> AppResult<Option<RunSummary>> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };

        // The frontend stops producing before the tasks go away, so the
        // stream ends on an event boundary.
        self.frontend.on_run_stop(active.run)?;
        let _ = active.cancel.send(true);

        if let Err(e) = active.maintenance.await {
            warn!(error = %e, "Maintenance task ended abnormally");
        }
        let summary = match active.readout.await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Readout task ended abnormally");
                RunSummary {
                    run: active.run,
                    ..Default::default()
                }
            }
        };

        info!(
            run = summary.run,
            events = summary.events,
            bytes = summary.bytes,
            "Run closed"
        );
        Ok(Some(summary))
    }

    /// Stop any active run and shut the frontend down.
    pub async fn shutdown(mut self) -> AppResult<Option<RunSummary>> {
        let summary = self.stop_run().await?;
        self.frontend.shutdown()?;
        Ok(summary)
    }
}

async fn readout_loop(
    frontend: Arc<dyn Frontend>,
    run: u32,
    period: Duration,
    tx: mpsc::Sender<Bytes>,
    mut cancel: watch::Receiver<bool>,
) -> RunSummary {
    let mut summary = RunSummary {
        run,
        ..Default::default()
    };
    let mut buf = BytesMut::new();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !frontend.on_poll() {
                    continue;
                }
                let size = frontend.on_read_event(&mut buf);
                if size == 0 {
                    continue;
                }
                let event = buf.split_to(size).freeze();
                tokio::select! {
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            debug!(run, "Event consumer gone, ending readout");
                            break;
                        }
                    }
                    _ = cancel.changed() => break,
                }
                summary.events += 1;
                summary.bytes += size as u64;
            }
            _ = cancel.changed() => break,
        }
    }
    summary
}

async fn maintenance_loop(
    frontend: Arc<dyn Frontend>,
    period: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => frontend.on_periodic_tick(),
            _ = cancel.changed() => break,
        }
    }
}
