//! Hook interface between a host run-control framework and a frontend.
//!
//! The host owns the threads and calls these hooks; a frontend never drives
//! itself. [`AcquisitionController`] implements the trait by mapping each hook
//! onto one state transition.

use bytes::BytesMut;
use tracing::warn;

use crate::controller::AcquisitionController;
use crate::error::AppResult;

/// Callbacks a host invokes on a frontend.
///
/// All hooks take `&self`: lifecycle, readout and periodic hooks may be
/// called from different threads.
pub trait Frontend: Send + Sync {
    /// Called once before any run.
    fn initialize(&self) -> AppResult<()>;

    /// Called once when the host exits.
    fn shutdown(&self) -> AppResult<()>;

    /// Run `run` begins.
    fn on_run_start(&self, run: u32) -> AppResult<()>;

    /// Run `run` ends.
    fn on_run_stop(&self, run: u32) -> AppResult<()>;

    /// Run `run` is suspended.
    fn on_run_pause(&self, run: u32) -> AppResult<()>;

    /// Run `run` continues after a pause.
    fn on_run_resume(&self, run: u32) -> AppResult<()>;

    /// Whether an event is ready to be read.
    fn on_poll(&self) -> bool;

    /// Write the next event into `buf` and return its size; 0 means no event.
    fn on_read_event(&self, buf: &mut BytesMut) -> usize;

    /// Timer hook for housekeeping.
    fn on_periodic_tick(&self);
}

impl Frontend for AcquisitionController {
    fn initialize(&self) -> AppResult<()> {
        AcquisitionController::initialize(self)
    }

    fn shutdown(&self) -> AppResult<()> {
        AcquisitionController::shutdown(self);
        Ok(())
    }

    fn on_run_start(&self, run: u32) -> AppResult<()> {
        self.start(run)
    }

    fn on_run_stop(&self, run: u32) -> AppResult<()> {
        self.stop(run);
        Ok(())
    }

    fn on_run_pause(&self, run: u32) -> AppResult<()> {
        self.pause(run);
        Ok(())
    }

    fn on_run_resume(&self, run: u32) -> AppResult<()> {
        self.resume(run);
        Ok(())
    }

    /// Runs the maintenance check; events are always ready while running.
    fn on_poll(&self) -> bool {
        self.on_periodic_tick();
        true
    }

    fn on_read_event(&self, buf: &mut BytesMut) -> usize {
        self.produce_event(buf)
    }

    fn on_periodic_tick(&self) {
        if let Err(e) = self.periodic_maintenance() {
            warn!(error = %e, "Hot reload failed, keeping current configuration");
        }
    }
}
