//! Arithmetic over the peripheral's relative tick counter.
//!
//! The counter runs at [`TICK_HZ`] and is [`TICK_BITS`] wide. It restarts at
//! zero on power cycle, explicit reset, and every time it overflows, so two
//! tick values can only be compared through [`calculate_elapsed`].

pub const TICK_HZ: u32 = 8;
pub const TICK_BITS: u32 = 24;
pub const TICK_MODULUS: u32 = 1 << TICK_BITS;
pub const TICK_MASK: u32 = TICK_MODULUS - 1;

/// Ticks elapsed from `start` to `end`, assuming at most one overflow between
/// them. Inputs are truncated to the counter width first.
pub fn calculate_elapsed(start: u32, end: u32) -> u32 {
    let start = start & TICK_MASK;
    let end = end & TICK_MASK;

    if end >= start {
        end - start
    } else {
        (TICK_MASK - start) + end + 1
    }
}

/// Whole seconds covered by a tick count, rounded down.
pub const fn ticks_to_secs(ticks: u32) -> u32 {
    ticks / TICK_HZ
}
