//! Packs one readout cycle into an event buffer.
//!
//! Bank order is fixed:
//!
//! 1. `V200` metadata ([`EventMetadata`], 8 DWORDs)
//! 2. `DCOF` DC offsets, one WORD per channel, always present
//! 3. `W200`..`W207` waveforms, one WORD bank per enabled channel in
//!    ascending order, omitted entirely when the record length is 0
//!
//! [`decode`] reverses the layout for consumers and tests.

use bytes::BytesMut;

use crate::bank::{
    bank_footprint, BankError, BankName, EventBuilder, EventReader, TypeId, EVENT_HEADER_SIZE,
};
use crate::instrument::{DcOffsets, InstrumentConfig, NUM_CHANNELS};

/// Name of the metadata bank.
pub const METADATA_BANK: BankName = BankName::new(b"V200");

/// Name of the DC-offset bank.
pub const DC_OFFSET_BANK: BankName = BankName::new(b"DCOF");

/// Prefix of the waveform bank names.
pub const WAVEFORM_BANK_PREFIX: &[u8; 2] = b"W2";

/// Payload size of the metadata bank.
pub const METADATA_SIZE: usize = 32;

/// Name of the waveform bank for `channel`.
pub const fn waveform_bank(channel: usize) -> BankName {
    BankName::indexed(WAVEFORM_BANK_PREFIX, channel)
}

// =============================================================================
// EventMetadata
// =============================================================================

/// Fixed-size record heading every event.
///
/// ```text
/// offset  field           type
///  0      board_id        u32   always 0
///  4      channel_mask    u32
///  8      event_counter   u32
/// 12      reserved        u32   0, aligns the time stamp
/// 16      timestamp_ns    u64
/// 24      pattern         u32   always 0
/// 28      frontend_index  u32
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMetadata {
    /// Board identifier, always 0 for the emulated board
    pub board_id: u32,
    /// Bit `i` set iff channel `i` is enabled
    pub channel_mask: u32,
    /// Event number within the run, starting at 1
    pub event_counter: u32,
    /// Wall-clock time of the readout
    pub timestamp_ns: u64,
    /// Trigger pattern, always 0
    pub pattern: u32,
    /// Index of this frontend among its peers
    pub frontend_index: u32,
}

impl EventMetadata {
    /// Decode the `V200` bank payload.
    pub fn from_bank(data: &[u8]) -> Result<Self, BankError> {
        if data.len() != METADATA_SIZE {
            return Err(BankError::UnexpectedSize {
                name: METADATA_BANK,
                expected: METADATA_SIZE,
                actual: data.len(),
            });
        }
        let dword =
            |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        Ok(Self {
            board_id: dword(0),
            channel_mask: dword(4),
            event_counter: dword(8),
            timestamp_ns: u64::from(dword(16)) | (u64::from(dword(20)) << 32),
            pattern: dword(24),
            frontend_index: dword(28),
        })
    }
}

// =============================================================================
// EventEncoder
// =============================================================================

/// Lays out metadata, DC offsets and waveforms as banks.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventEncoder {
    frontend_index: u32,
}

impl EventEncoder {
    /// Encoder stamping `frontend_index` into every event.
    pub fn new(frontend_index: u32) -> Self {
        Self { frontend_index }
    }

    /// Frontend index written to the metadata bank.
    pub fn frontend_index(&self) -> u32 {
        self.frontend_index
    }

    /// Metadata of the next event of a run.
    pub fn metadata(
        &self,
        config: &InstrumentConfig,
        event_counter: u32,
        timestamp_ns: u64,
    ) -> EventMetadata {
        EventMetadata {
            board_id: 0,
            channel_mask: config.channel_enable_mask(),
            event_counter,
            timestamp_ns,
            pattern: 0,
            frontend_index: self.frontend_index,
        }
    }

    /// Append one event to `buf` and return its size in bytes.
    ///
    /// `waveforms[ch]` must hold `config.record_length` samples for every
    /// enabled channel; entries of disabled channels are not read.
    pub fn encode(
        &self,
        metadata: &EventMetadata,
        config: &InstrumentConfig,
        waveforms: &[Vec<u16>; NUM_CHANNELS],
        buf: &mut BytesMut,
    ) -> usize {
        buf.reserve(event_size(config));
        let mut event = EventBuilder::new(buf);

        let mut bank = event.create_bank(METADATA_BANK, TypeId::DWord);
        bank.put_u32(metadata.board_id);
        bank.put_u32(metadata.channel_mask);
        bank.put_u32(metadata.event_counter);
        bank.put_u32(0);
        bank.put_u64(metadata.timestamp_ns);
        bank.put_u32(metadata.pattern);
        bank.put_u32(metadata.frontend_index);
        bank.close();

        let mut bank = event.create_bank(DC_OFFSET_BANK, TypeId::Word);
        bank.put_u16_slice(&config.dc_offsets());
        bank.close();

        if config.record_length > 0 {
            let len = config.record_length as usize;
            for channel in config.enabled_channels() {
                let mut bank = event.create_bank(waveform_bank(channel), TypeId::Word);
                bank.put_u16_slice(&waveforms[channel][..len]);
                bank.close();
            }
        }

        event.total_size()
    }
}

/// Exact size of an event encoded from `config`.
pub fn event_size(config: &InstrumentConfig) -> usize {
    let waveform_banks = if config.record_length > 0 {
        config.enabled_channels().count()
    } else {
        0
    };
    EVENT_HEADER_SIZE
        + bank_footprint(METADATA_SIZE)
        + bank_footprint(NUM_CHANNELS * 2)
        + waveform_banks * bank_footprint(config.record_length as usize * 2)
}

// =============================================================================
// Decoding
// =============================================================================

/// An event read back from its buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    /// Contents of the `V200` bank
    pub metadata: EventMetadata,
    /// Contents of the `DCOF` bank
    pub dc_offsets: DcOffsets,
    /// `(channel, samples)` per waveform bank, in buffer order
    pub waveforms: Vec<(usize, Vec<u16>)>,
    /// Number of banks in the event
    pub bank_count: usize,
    /// Event size including the event header
    pub total_size: usize,
}

/// Decode an event produced by [`EventEncoder::encode`].
pub fn decode(bytes: &[u8]) -> Result<DecodedEvent, BankError> {
    let reader = EventReader::parse(bytes)?;
    let metadata = EventMetadata::from_bank(reader.require(METADATA_BANK)?.data)?;

    let dc_bank = reader.require(DC_OFFSET_BANK)?;
    let words = dc_bank.words();
    let dc_offsets: DcOffsets =
        words
            .as_slice()
            .try_into()
            .map_err(|_| BankError::UnexpectedSize {
                name: DC_OFFSET_BANK,
                expected: NUM_CHANNELS * 2,
                actual: dc_bank.data.len(),
            })?;

    let waveforms = (0..NUM_CHANNELS)
        .filter_map(|channel| {
            reader
                .find(waveform_bank(channel))
                .map(|bank| (channel, bank.words()))
        })
        .collect();

    Ok(DecodedEvent {
        metadata,
        dc_offsets,
        waveforms,
        bank_count: reader.banks().len(),
        total_size: reader.total_size(),
    })
}
