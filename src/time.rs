//! Monotonic microsecond clock shared by the radio driver and protocol engine.
//!
//! The wire format (`tmst` fields, §4.3) is a 32-bit microsecond counter that
//! wraps roughly every 71 minutes. All comparisons between two timestamps
//! must go through [`delta_us`], which treats the difference as a signed
//! 32-bit quantity so a comparison spanning a wraparound still comes out
//! right.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Microseconds elapsed since the first call to any function in this module,
/// truncated to 32 bits the same way the radio hardware's free-running
/// counter would be.
pub fn now_us() -> u32 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_micros() as u32
}

/// `to - from`, interpreted as a signed 32-bit delta so wraparound near the
/// 2^32 boundary does not produce a huge positive or negative jump.
pub fn delta_us(to: u32, from: u32) -> i32 {
    to.wrapping_sub(from) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_handles_wraparound() {
        // `to` has wrapped past `from`.
        let from = u32::MAX - 10;
        let to = 10u32; // wrapped by 21 us
        assert_eq!(delta_us(to, from), 21);
    }

    #[test]
    fn delta_handles_ordinary_case() {
        assert_eq!(delta_us(1_050_000, 1_000_000), 50_000);
        assert_eq!(delta_us(800_000, 1_000_000), -200_000);
    }

    #[test]
    fn now_us_is_monotonic_non_decreasing() {
        let a = now_us();
        let b = now_us();
        assert!(delta_us(b, a) >= 0);
    }
}
