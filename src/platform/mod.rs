//! OS process probes used by the orphan sweep.

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::process_alive;

/// Without a probe every owner is reported alive, so a sweep reclaims nothing.
#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}
