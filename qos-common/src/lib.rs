use std::time::SystemTime;

pub mod command;
mod rate;

pub use rate::Rate;

/// Returns the current UNIX timestamp in microseconds.
#[inline]
pub fn unix_micros() -> u64 {
    SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_micros()
        as u64
}

/// Returns the current UNIX timestamp in milliseconds.
#[inline]
pub fn unix_millis() -> u64 {
    unix_micros() / 1_000
}

/// Rate units, in kbit/s.
#[allow(non_upper_case_globals)]
pub mod constants {
    pub const Kbit: u64 = 1;
    pub const Mbit: u64 = 1_000 * Kbit;
    pub const Gbit: u64 = 1_000 * Mbit;
}
