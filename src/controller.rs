//! Run state machine of the emulated digitizer.
//!
//! ```text
//! Uninitialized --initialize--> Ready --start--> Running --pause--> Paused
//!                                 ^                 |  ^              |
//!                                 |                 |  +---resume-----+
//!                                 +------stop-------+-----------------+
//! Ready --shutdown--> Exited
//! ```
//!
//! Three call sites share one [`AcquisitionController`] through `&self`:
//! the lifecycle path (transitions), the readout path
//! ([`AcquisitionController::produce_event`]) and the maintenance timer
//! ([`AcquisitionController::periodic_maintenance`]).
//!
//! # Locking
//!
//! - `acquisition_on` is an atomic flag. The readout path checks it without
//!   locking and re-checks it once it holds the readout lock.
//! - The configuration is an immutable `Arc<InstrumentConfig>` behind a
//!   reader-writer lock. Reloads read the store without that lock and take
//!   the write lock only to publish the new snapshot; readout clones the
//!   `Arc` and never observes a half-written configuration.
//! - The readout lock owns the scratch waveforms and is held for the whole of
//!   event production. Stop and pause clear the flag and then take and release
//!   it, so no event of the previous run is in flight when they return.
//!
//! Lock order is state, then readout, then configuration.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace};

use crate::clock::Clock;
use crate::encoder::{event_size, EventEncoder};
use crate::error::{AppResult, DaqError};
use crate::instrument::{InstrumentConfig, SettingsKeys, NUM_CHANNELS};
use crate::store::ConfigStore;
use crate::synth::synthesize;

/// Lifecycle state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontendState {
    /// Constructed, configuration not loaded yet
    Uninitialized,
    /// Configured, no run active
    Ready,
    /// Producing events
    Running,
    /// Run active but not producing events
    Paused,
    /// Shut down; terminal
    Exited,
}

impl fmt::Display for FrontendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Exited => "exited",
        };
        f.write_str(name)
    }
}

/// Construction parameters of an [`AcquisitionController`].
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Store namespace of the equipment settings.
    pub settings: SettingsKeys,
    /// Index stamped into every metadata bank.
    pub frontend_index: u32,
    /// Minimum interval between two hot-reload checks.
    pub hot_reload_period: Duration,
    /// Largest event the host accepts, in bytes.
    pub max_event_size: usize,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            settings: SettingsKeys::new(crate::config::DEFAULT_EQUIPMENT),
            frontend_index: 0,
            hot_reload_period: Duration::from_millis(crate::config::DEFAULT_HOT_RELOAD_MS),
            max_event_size: crate::config::DEFAULT_MAX_EVENT_SIZE,
        }
    }
}

/// Scratch waveforms reused from event to event.
struct Readout {
    waveforms: [Vec<u16>; NUM_CHANNELS],
}

impl Readout {
    fn new() -> Self {
        Self {
            waveforms: std::array::from_fn(|_| Vec::new()),
        }
    }

    fn fill(&mut self, config: &InstrumentConfig, elapsed_ns: i64) {
        let len = config.record_length as usize;
        for channel in config.enabled_channels() {
            let samples = &mut self.waveforms[channel];
            samples.resize(len, 0);
            synthesize(config, channel, elapsed_ns, samples);
        }
    }
}

/// Owns the run state and turns lifecycle calls into events.
pub struct AcquisitionController {
    store: Arc<dyn ConfigStore>,
    clock: Arc<dyn Clock>,
    settings: SettingsKeys,
    encoder: EventEncoder,
    hot_reload_period_ms: u64,
    max_event_size: usize,

    state: Mutex<FrontendState>,
    run_number: AtomicU32,
    acquisition_on: AtomicBool,
    config: RwLock<Arc<InstrumentConfig>>,
    run_start_ns: AtomicU64,
    event_counter: AtomicU32,
    readout: Mutex<Readout>,
    last_maintenance_ms: AtomicU64,
}

impl AcquisitionController {
    /// Create an uninitialized controller.
    pub fn new(
        store: Arc<dyn ConfigStore>,
        clock: Arc<dyn Clock>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            store,
            clock,
            settings: options.settings,
            encoder: EventEncoder::new(options.frontend_index),
            hot_reload_period_ms: options.hot_reload_period.as_millis() as u64,
            max_event_size: options.max_event_size,
            state: Mutex::new(FrontendState::Uninitialized),
            run_number: AtomicU32::new(0),
            acquisition_on: AtomicBool::new(false),
            config: RwLock::new(Arc::new(InstrumentConfig::default())),
            run_start_ns: AtomicU64::new(0),
            event_counter: AtomicU32::new(0),
            readout: Mutex::new(Readout::new()),
            last_maintenance_ms: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Register the settings keys and load the configuration.
    ///
    /// Only valid from `Uninitialized`; a failed load keeps that state.
    pub fn initialize(&self) -> AppResult<()> {
        let mut state = self.state.lock();
        if *state != FrontendState::Uninitialized {
            debug!(state = %*state, "Ignoring initialize");
            return Ok(());
        }

        let config = self.load_config()?;
        info!(
            equipment = self.settings.equipment(),
            sample_clock_hz = config.sample_clock_hz,
            record_length = config.record_length,
            channel_mask = config.channel_enable_mask(),
            "Frontend initialized"
        );
        *self.config.write() = Arc::new(config);
        self.last_maintenance_ms
            .store(self.clock.now_ms(), Ordering::Relaxed);
        *state = FrontendState::Ready;
        Ok(())
    }

    /// Begin run `run`, reloading the full configuration.
    ///
    /// Valid from `Ready` and `Paused`. On error the state is unchanged and
    /// the previous configuration stays in effect.
    pub fn start(&self, run: u32) -> AppResult<()> {
        let mut state = self.state.lock();
        if !matches!(*state, FrontendState::Ready | FrontendState::Paused) {
            debug!(run, state = %*state, "Ignoring start");
            return Ok(());
        }

        let config = self.load_config()?;
        let size = event_size(&config);
        if size > self.max_event_size {
            return Err(DaqError::Configuration(format!(
                "event size {size} exceeds the maximum of {} bytes",
                self.max_event_size
            )));
        }

        info!(
            run,
            record_length = config.record_length,
            channel_mask = config.channel_enable_mask(),
            event_size = size,
            "Run started"
        );
        *self.config.write() = Arc::new(config);
        self.arm(run);
        *state = FrontendState::Running;
        Ok(())
    }

    /// End the active run. Valid from `Running` and `Paused`.
    pub fn stop(&self, run: u32) {
        let mut state = self.state.lock();
        if !matches!(*state, FrontendState::Running | FrontendState::Paused) {
            debug!(run, state = %*state, "Ignoring stop");
            return;
        }
        self.drain();
        info!(
            run,
            events = self.event_counter.load(Ordering::Relaxed),
            "Run stopped"
        );
        *state = FrontendState::Ready;
    }

    /// Suspend event production. Valid from `Running`.
    pub fn pause(&self, run: u32) {
        let mut state = self.state.lock();
        if *state != FrontendState::Running {
            debug!(run, state = %*state, "Ignoring pause");
            return;
        }
        self.drain();
        info!(run, "Run paused");
        *state = FrontendState::Paused;
    }

    /// Continue a paused run with the configuration it already has.
    ///
    /// The run clock and the event counter restart.
    pub fn resume(&self, run: u32) {
        let mut state = self.state.lock();
        if *state != FrontendState::Paused {
            debug!(run, state = %*state, "Ignoring resume");
            return;
        }
        self.arm(run);
        info!(run, "Run resumed");
        *state = FrontendState::Running;
    }

    /// Stop any active run and enter the terminal state.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        match *state {
            FrontendState::Exited => return,
            FrontendState::Running | FrontendState::Paused => self.drain(),
            FrontendState::Uninitialized | FrontendState::Ready => {}
        }
        info!(previous = %*state, "Frontend shut down");
        *state = FrontendState::Exited;
    }

    // =========================================================================
    // Readout
    // =========================================================================

    /// Produce the next event into `buf`, replacing its contents.
    ///
    /// Returns the event size, or 0 without touching `buf` when acquisition
    /// is off.
    pub fn produce_event(&self, buf: &mut BytesMut) -> usize {
        if !self.acquisition_on.load(Ordering::Relaxed) {
            return 0;
        }

        let mut readout = self.readout.lock();
        // A stop may have won the race for the lock.
        if !self.acquisition_on.load(Ordering::Acquire) {
            return 0;
        }

        let config = self.config.read().clone();
        let counter = self
            .event_counter
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1);
        let now_ns = self.clock.now_ns();
        let elapsed_ns = now_ns.wrapping_sub(self.run_start_ns.load(Ordering::Relaxed)) as i64;

        readout.fill(&config, elapsed_ns);

        buf.clear();
        let metadata = self.encoder.metadata(&config, counter, now_ns);
        let size = self
            .encoder
            .encode(&metadata, &config, &readout.waveforms, buf);
        trace!(event = counter, elapsed_ns, size, "Event produced");
        size
    }

    /// Re-read the DC offsets if the hot-reload period has elapsed.
    ///
    /// Returns `true` when new offsets were adopted. Does nothing before
    /// `initialize` or after `shutdown`.
    pub fn periodic_maintenance(&self) -> AppResult<bool> {
        let state = self.state.lock();
        if matches!(*state, FrontendState::Uninitialized | FrontendState::Exited) {
            return Ok(false);
        }

        let now_ms = self.clock.now_ms();
        let last_ms = self.last_maintenance_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last_ms) < self.hot_reload_period_ms {
            return Ok(false);
        }
        self.last_maintenance_ms.store(now_ms, Ordering::Relaxed);

        // The state lock serializes writers, so the snapshot cannot change
        // while the store is read without the config lock held.
        let current = self.config();
        let Some(offsets) = current.load_hot_subset(self.store.as_ref(), &self.settings)? else {
            return Ok(false);
        };
        let next = Arc::new(current.with_dc_offsets(offsets));
        *self.config.write() = next;
        info!(
            run = self.run_number.load(Ordering::Relaxed),
            dc_offsets = ?offsets,
            "DC offset changed"
        );
        Ok(true)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current lifecycle state.
    pub fn state(&self) -> FrontendState {
        *self.state.lock()
    }

    /// Whether events are being produced.
    pub fn is_acquiring(&self) -> bool {
        self.acquisition_on.load(Ordering::Relaxed)
    }

    /// Configuration snapshot used by the next event.
    pub fn config(&self) -> Arc<InstrumentConfig> {
        self.config.read().clone()
    }

    /// Counter value of the last event produced in this run.
    pub fn event_counter(&self) -> u32 {
        self.event_counter.load(Ordering::Relaxed)
    }

    /// Number of the current or last run.
    pub fn run_number(&self) -> u32 {
        self.run_number.load(Ordering::Relaxed)
    }

    /// Settings namespace in the store.
    pub fn settings(&self) -> &SettingsKeys {
        &self.settings
    }

    /// Size of the next event for the current configuration.
    pub fn event_size(&self) -> usize {
        event_size(&self.config())
    }

    fn load_config(&self) -> AppResult<InstrumentConfig> {
        let config = InstrumentConfig::load_full(self.store.as_ref(), &self.settings)?;
        config.validate()?;
        Ok(config)
    }

    /// Reset the run clock and counter, then enable acquisition.
    fn arm(&self, run: u32) {
        {
            let _readout = self.readout.lock();
            self.run_number.store(run, Ordering::Relaxed);
            self.run_start_ns
                .store(self.clock.now_ns(), Ordering::Relaxed);
            self.event_counter.store(0, Ordering::Relaxed);
        }
        self.acquisition_on.store(true, Ordering::Release);
    }

    /// Disable acquisition and wait for an in-flight event to finish.
    fn drain(&self) {
        self.acquisition_on.store(false, Ordering::SeqCst);
        drop(self.readout.lock());
    }
}

impl fmt::Debug for AcquisitionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquisitionController")
            .field("equipment", &self.settings.equipment())
            .field("state", &self.state())
            .field("acquisition_on", &self.is_acquiring())
            .field("event_counter", &self.event_counter())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::encoder::decode;
    use crate::instrument::keys;
    use crate::store::{MemoryStore, StoreError};
    use std::thread;
    use std::time::Instant;
    use tracing_test::traced_test;

    /// Store whose reads stall while `slow` is set.
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
        slow: AtomicBool,
    }

    impl ConfigStore for SlowStore {
        fn get(&self, path: &str) -> Result<Option<toml::Value>, StoreError> {
            if self.slow.load(Ordering::SeqCst) {
                thread::sleep(self.delay);
            }
            self.inner.get(path)
        }

        fn set(&self, path: &str, value: toml::Value) -> Result<(), StoreError> {
            self.inner.set(path, value)
        }
    }

    fn reload_every_call() -> ControllerOptions {
        ControllerOptions {
            hot_reload_period: Duration::ZERO,
            ..Default::default()
        }
    }

    fn controller(seed: &str) -> (AcquisitionController, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::from_toml_str(seed).unwrap());
        let clock = Arc::new(ManualClock::new(1_000_000_000));
        let controller = AcquisitionController::new(
            store.clone(),
            clock.clone(),
            ControllerOptions::default(),
        );
        (controller, store, clock)
    }

    #[test]
    fn test_lifecycle_transitions() {
        let (ctl, _, _) = controller("");
        assert_eq!(ctl.state(), FrontendState::Uninitialized);

        ctl.initialize().unwrap();
        assert_eq!(ctl.state(), FrontendState::Ready);

        ctl.start(1).unwrap();
        assert_eq!(ctl.state(), FrontendState::Running);
        assert!(ctl.is_acquiring());

        ctl.pause(1);
        assert_eq!(ctl.state(), FrontendState::Paused);
        assert!(!ctl.is_acquiring());

        ctl.resume(1);
        assert_eq!(ctl.state(), FrontendState::Running);

        ctl.stop(1);
        assert_eq!(ctl.state(), FrontendState::Ready);

        ctl.shutdown();
        assert_eq!(ctl.state(), FrontendState::Exited);
    }

    #[test]
    fn test_invalid_transitions_are_ignored() {
        let (ctl, _, _) = controller("");
        ctl.start(1).unwrap();
        assert_eq!(ctl.state(), FrontendState::Uninitialized);

        ctl.initialize().unwrap();
        ctl.stop(1);
        ctl.pause(1);
        ctl.resume(1);
        assert_eq!(ctl.state(), FrontendState::Ready);

        ctl.start(1).unwrap();
        ctl.initialize().unwrap();
        ctl.start(2).unwrap();
        ctl.resume(2);
        assert_eq!(ctl.state(), FrontendState::Running);
        assert_eq!(ctl.run_number(), 1);
    }

    #[test]
    fn test_counter_starts_at_one_and_increments() {
        let (ctl, _, clock) = controller("Equipment.sinus.Settings.waveform_length = 8");
        ctl.initialize().unwrap();
        ctl.start(1).unwrap();

        let mut buf = BytesMut::new();
        for expected in 1..=3 {
            clock.advance_ms(10);
            assert!(ctl.produce_event(&mut buf) > 0);
            assert_eq!(decode(&buf).unwrap().metadata.event_counter, expected);
        }
        assert_eq!(ctl.event_counter(), 3);
    }

    #[test]
    fn test_no_event_after_stop() {
        let (ctl, _, _) = controller("");
        ctl.initialize().unwrap();
        ctl.start(1).unwrap();
        ctl.stop(1);

        let mut buf = BytesMut::from(&b"stale"[..]);
        assert_eq!(ctl.produce_event(&mut buf), 0);
        assert_eq!(&buf[..], b"stale");
        assert_eq!(ctl.event_counter(), 0);
    }

    #[test]
    fn test_timestamp_and_elapsed_share_one_clock_reading() {
        let (ctl, _, clock) = controller(
            r#"
            [Equipment.sinus.Settings]
            discrete_frequency = 4000
            waveform_length = 4
            channel_frequency = [1000, 1000, 1000, 1000, 1000, 1000, 1000, 1000]
            "#,
        );
        ctl.initialize().unwrap();
        ctl.start(1).unwrap();

        // A quarter period after run start every channel begins at its peak.
        clock.advance_ns(250_000);
        let mut buf = BytesMut::new();
        ctl.produce_event(&mut buf);
        let event = decode(&buf).unwrap();
        assert_eq!(event.metadata.timestamp_ns, 1_000_250_000);
        assert_eq!(event.waveforms.len(), NUM_CHANNELS);
        assert!(event.waveforms.iter().all(|(_, w)| w[0] == 3048));
    }

    #[test]
    fn test_start_reloads_configuration_but_resume_does_not() {
        let (ctl, store, _) = controller("");
        ctl.initialize().unwrap();
        ctl.start(1).unwrap();
        ctl.pause(1);

        let path = ctl.settings().path(keys::WAVEFORM_LENGTH);
        store.set(&path, toml::Value::Integer(16)).unwrap();

        ctl.resume(1);
        assert_eq!(ctl.config().record_length, 1024);

        ctl.stop(1);
        ctl.start(2).unwrap();
        assert_eq!(ctl.config().record_length, 16);
    }

    #[test]
    fn test_failed_start_keeps_state_and_config() {
        let (ctl, store, _) = controller("");
        ctl.initialize().unwrap();

        let path = ctl.settings().path(keys::DISCRETE_FREQUENCY);
        store.set(&path, toml::Value::Integer(0)).unwrap();
        let err = ctl.start(1).unwrap_err();
        assert!(err.can_recover());
        assert_eq!(ctl.state(), FrontendState::Ready);
        assert_eq!(ctl.config().sample_clock_hz, 250_000_000);

        store.set(&path, toml::Value::Integer(100)).unwrap();
        ctl.start(1).unwrap();
        assert_eq!(ctl.state(), FrontendState::Running);
    }

    #[test]
    fn test_oversized_event_is_rejected_at_start() {
        let store = Arc::new(
            MemoryStore::from_toml_str("Equipment.sinus.Settings.waveform_length = 100000").unwrap(),
        );
        let ctl = AcquisitionController::new(
            store,
            Arc::new(ManualClock::new(0)),
            ControllerOptions {
                max_event_size: 64 * 1024,
                ..Default::default()
            },
        );
        ctl.initialize().unwrap();
        assert!(matches!(ctl.start(1), Err(DaqError::Configuration(_))));
        assert_eq!(ctl.state(), FrontendState::Ready);
    }

    #[test]
    fn test_hot_reload_is_rate_limited() {
        let (ctl, store, clock) = controller("");
        ctl.initialize().unwrap();
        ctl.start(1).unwrap();

        let path = ctl.settings().path(keys::CHANNEL_DC_OFFSET);
        store
            .set(&path, toml::Value::try_from(vec![7u16; NUM_CHANNELS]).unwrap())
            .unwrap();

        clock.advance_ms(999);
        assert!(!ctl.periodic_maintenance().unwrap());
        assert_eq!(ctl.config().dc_offsets(), [0; NUM_CHANNELS]);

        clock.advance_ms(1);
        assert!(ctl.periodic_maintenance().unwrap());
        assert_eq!(ctl.config().dc_offsets(), [7; NUM_CHANNELS]);

        // Timer was reset; unchanged values report nothing either way.
        clock.advance_ms(1000);
        assert!(!ctl.periodic_maintenance().unwrap());
    }

    #[test]
    #[traced_test]
    fn test_hot_reload_changes_dc_bank_and_logs() {
        let (ctl, store, clock) = controller("Equipment.sinus.Settings.waveform_length = 4");
        ctl.initialize().unwrap();
        ctl.start(1).unwrap();

        clock.advance_ms(1000);
        assert!(!ctl.periodic_maintenance().unwrap());
        assert!(!logs_contain("DC offset changed"));

        let path = ctl.settings().path(keys::CHANNEL_DC_OFFSET);
        store
            .set(
                &path,
                toml::Value::try_from(vec![100u16, 200, 300, 400, 500, 600, 700, 800]).unwrap(),
            )
            .unwrap();

        let mut buf = BytesMut::new();
        ctl.produce_event(&mut buf);
        assert_eq!(decode(&buf).unwrap().dc_offsets, [0; NUM_CHANNELS]);

        clock.advance_ms(1000);
        assert!(ctl.periodic_maintenance().unwrap());
        assert!(logs_contain("DC offset changed"));

        ctl.produce_event(&mut buf);
        let event = decode(&buf).unwrap();
        assert_eq!(event.dc_offsets, [100, 200, 300, 400, 500, 600, 700, 800]);
        assert_eq!(event.metadata.event_counter, 2);
    }

    #[test]
    fn test_maintenance_before_initialize_is_noop() {
        let (ctl, store, clock) = controller("");
        clock.advance_ms(10_000);
        assert!(!ctl.periodic_maintenance().unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_shutdown_while_running_drains() {
        let (ctl, _, _) = controller("");
        ctl.initialize().unwrap();
        ctl.start(3).unwrap();
        ctl.shutdown();
        assert_eq!(ctl.state(), FrontendState::Exited);
        assert_eq!(ctl.produce_event(&mut BytesMut::new()), 0);

        ctl.start(4).unwrap();
        assert_eq!(ctl.state(), FrontendState::Exited);
    }

    #[test]
    fn test_concurrent_readout_and_stop() {
        let (ctl, _, _) = controller("Equipment.sinus.Settings.waveform_length = 64");
        let ctl = Arc::new(ctl);
        ctl.initialize().unwrap();
        ctl.start(1).unwrap();

        let reader = {
            let ctl = Arc::clone(&ctl);
            std::thread::spawn(move || {
                let mut buf = BytesMut::new();
                let mut produced = 0u32;
                while ctl.produce_event(&mut buf) > 0 {
                    produced += 1;
                    assert!(decode(&buf).is_ok());
                }
                produced
            })
        };

        std::thread::sleep(Duration::from_millis(5));
        ctl.stop(1);
        let produced = reader.join().unwrap();
        assert_eq!(produced, ctl.event_counter());
        assert_eq!(ctl.produce_event(&mut BytesMut::new()), 0);
    }

    #[test]
    fn test_slow_store_read_does_not_stall_readout() {
        let store = Arc::new(SlowStore {
            inner: MemoryStore::from_toml_str("Equipment.sinus.Settings.waveform_length = 64")
                .unwrap(),
            delay: Duration::from_millis(500),
            slow: AtomicBool::new(false),
        });
        let ctl = Arc::new(AcquisitionController::new(
            store.clone(),
            Arc::new(ManualClock::new(0)),
            reload_every_call(),
        ));
        ctl.initialize().unwrap();
        ctl.start(1).unwrap();

        store.slow.store(true, Ordering::SeqCst);
        let maintenance = {
            let ctl = Arc::clone(&ctl);
            thread::spawn(move || ctl.periodic_maintenance())
        };
        thread::sleep(Duration::from_millis(50));

        let mut buf = BytesMut::new();
        let started = Instant::now();
        assert!(ctl.produce_event(&mut buf) > 0);
        let took = started.elapsed();

        assert!(!maintenance.join().unwrap().unwrap());
        assert!(
            took < Duration::from_millis(250),
            "readout waited {took:?} on a store read"
        );
    }

    #[test]
    fn test_concurrent_hot_reload_and_readout() {
        let store = Arc::new(
            MemoryStore::from_toml_str("Equipment.sinus.Settings.waveform_length = 4").unwrap(),
        );
        let ctl = Arc::new(AcquisitionController::new(
            store.clone(),
            Arc::new(ManualClock::new(0)),
            reload_every_call(),
        ));
        ctl.initialize().unwrap();
        ctl.start(1).unwrap();

        let reader = {
            let ctl = Arc::clone(&ctl);
            thread::spawn(move || {
                let mut buf = BytesMut::new();
                let mut last = 0u32;
                while ctl.produce_event(&mut buf) > 0 {
                    let event = decode(&buf).unwrap();
                    let first = event.dc_offsets[0];
                    assert!(
                        event.dc_offsets.iter().all(|&o| o == first),
                        "mixed DC offsets {:?}",
                        event.dc_offsets
                    );
                    assert!(event.metadata.event_counter > last);
                    last = event.metadata.event_counter;
                }
                last
            })
        };

        let path = ctl.settings().path(keys::CHANNEL_DC_OFFSET);
        for i in 1..=2000u16 {
            store
                .set(&path, toml::Value::try_from(vec![i; NUM_CHANNELS]).unwrap())
                .unwrap();
            assert!(ctl.periodic_maintenance().unwrap());
        }
        ctl.stop(1);

        let last = reader.join().unwrap();
        assert_eq!(last, ctl.event_counter());
        assert_eq!(ctl.config().dc_offsets(), [2000; NUM_CHANNELS]);
    }
}
