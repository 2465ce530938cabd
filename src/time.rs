//! Boot-relative timekeeping.
//!
//! Built on the calibrated TSC ([`crate::arch::x86_64::tsc`]); falls back to
//! the PIT tick counter before calibration has run so early boot logging
//! still gets monotonically increasing (if coarse) timestamps.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::x86_64::tsc;

static BOOT_TSC: AtomicU64 = AtomicU64::new(0);

/// Current time since an arbitrary epoch, in microseconds.
pub fn get_timestamp_us() -> u64 {
    if tsc::get_tsc_frequency() != 0 {
        tsc::tsc_to_ns(tsc::read_tsc()) / 1000
    } else {
        crate::arch::x86_64::pit::ticks() * 1000
    }
}

pub fn init_boot_timestamp() {
    BOOT_TSC.store(tsc::read_tsc(), Ordering::Relaxed);
}

pub fn get_time_since_boot_us() -> u64 {
    if tsc::get_tsc_frequency() == 0 {
        return get_timestamp_us();
    }
    let boot = BOOT_TSC.load(Ordering::Relaxed);
    let now = tsc::read_tsc();
    tsc::tsc_to_ns(now.saturating_sub(boot)) / 1000
}

pub fn get_time_since_boot_ms() -> u64 {
    get_time_since_boot_us() / 1000
}

pub fn get_uptime_ms() -> u64 {
    get_time_since_boot_ms()
}
