//! AU915 frequency plan: uplink/downlink channel tables and RX1 mapping.
//!
//! Mirrors the region constant-table shape used for the single-radio config
//! in the teacher's LoRa region module, narrowed to the one band this
//! gateway serves (the distillation's Non-goals exclude other regions in
//! this revision).

/// Number of uplink channels in the AU915 plan.
pub const UPLINK_CHANNEL_COUNT: u8 = 64;
/// First uplink channel's centre frequency, in Hz.
pub const UPLINK_START_HZ: u32 = 915_200_000;
/// Spacing between adjacent uplink channels, in Hz.
pub const UPLINK_STEP_HZ: u32 = 200_000;

/// Number of downlink channels in the AU915 plan.
pub const DOWNLINK_CHANNEL_COUNT: u8 = 8;
/// First downlink channel's centre frequency, in Hz.
pub const DOWNLINK_START_HZ: u32 = 923_300_000;
/// Spacing between adjacent downlink channels, in Hz.
pub const DOWNLINK_STEP_HZ: u32 = 600_000;

/// Number of uplink channels per sub-band.
pub const SUB_BAND_SIZE: u8 = 8;
/// Number of sub-bands.
pub const SUB_BAND_COUNT: u8 = 8;

/// Public LoRaWAN sync word.
pub const SYNC_WORD: u8 = 0x34;

/// RX2 fallback frequency (Hz), fixed at SF12/BW500 in AU915.
pub const RX2_FREQUENCY_HZ: u32 = 923_300_000;

/// Centre frequency of uplink channel `chan` (0..64), or `None` if out of range.
pub fn uplink_freq_hz(chan: u8) -> Option<u32> {
    if chan >= UPLINK_CHANNEL_COUNT {
        return None;
    }
    Some(UPLINK_START_HZ + chan as u32 * UPLINK_STEP_HZ)
}

/// Centre frequency of downlink channel `chan` (0..8), or `None` if out of range.
pub fn downlink_freq_hz(chan: u8) -> Option<u32> {
    if chan >= DOWNLINK_CHANNEL_COUNT {
        return None;
    }
    Some(DOWNLINK_START_HZ + chan as u32 * DOWNLINK_STEP_HZ)
}

/// Which sub-band (0..8) an uplink channel belongs to.
pub fn sub_band_of(uplink_chan: u8) -> u8 {
    (uplink_chan / SUB_BAND_SIZE).min(SUB_BAND_COUNT - 1)
}

/// RX1 downlink channel for a given uplink channel: `uplink_chan / 8`, capped at 7.
pub fn rx1_downlink_channel(uplink_chan: u8) -> u8 {
    (uplink_chan / 8).min(DOWNLINK_CHANNEL_COUNT - 1)
}
