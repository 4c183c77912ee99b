//! # Synthetic Sine Digitizer Frontend
//!
//! `sinus_daq` emulates an 8-channel, 12-bit waveform digitizer in a
//! data-acquisition pipeline. Every channel produces a parameter-controlled
//! sine wave; each readout packs metadata, DC offsets and waveforms into a
//! self-describing event of named banks.
//!
//! ## Crate Structure
//!
//! - **`instrument`**: `ChannelConfig` / `InstrumentConfig`, loaded from and
//!   reconciled against the configuration store.
//! - **`synth`**: pure waveform synthesis and 12-bit quantization.
//! - **`bank`**: MIDAS 32-bit bank writer and reader.
//! - **`encoder`**: event layout (metadata, DC offsets, waveforms) and decoding.
//! - **`controller`**: `AcquisitionController`, the run state machine.
//! - **`frontend`**: the `Frontend` hook trait a host framework drives.
//! - **`store`**: the `ConfigStore` interface and an in-memory implementation.
//! - **`clock`**: wall clock and a manual clock for reproducible runs.
//! - **`runner`**: a tokio host loop streaming events over a channel.
//! - **`config`** / **`logging`**: application settings and tracing setup.
//! - **`error`**: `DaqError` and `AppResult`.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use bytes::BytesMut;
//! use sinus_daq::clock::ManualClock;
//! use sinus_daq::controller::{AcquisitionController, ControllerOptions};
//! use sinus_daq::encoder::decode;
//! use sinus_daq::store::MemoryStore;
//!
//! let store = Arc::new(MemoryStore::new());
//! let clock = Arc::new(ManualClock::new(0));
//! let controller = AcquisitionController::new(store, clock, ControllerOptions::default());
//!
//! controller.initialize().unwrap();
//! controller.start(1).unwrap();
//!
//! let mut buf = BytesMut::new();
//! let size = controller.produce_event(&mut buf);
//! let event = decode(&buf[..size]).unwrap();
//! assert_eq!(event.metadata.event_counter, 1);
//! assert_eq!(event.waveforms.len(), 8);
//! ```

pub mod bank;
pub mod clock;
pub mod config;
pub mod controller;
pub mod encoder;
pub mod error;
pub mod frontend;
pub mod instrument;
pub mod logging;
pub mod runner;
pub mod store;
pub mod synth;

pub use controller::{AcquisitionController, ControllerOptions, FrontendState};
pub use error::{AppResult, DaqError};
pub use frontend::Frontend;
pub use instrument::{ChannelConfig, InstrumentConfig, NUM_CHANNELS};
