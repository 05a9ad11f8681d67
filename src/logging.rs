//! Thin logging helpers over `tracing`.
//!
//! Call sites build their message with `format!` and hand it over; the
//! helpers keep a single target so `RUST_LOG=taskmon=debug` catches all of it.

pub fn debug(message: impl AsRef<str>) {
    tracing::debug!(target: "taskmon", "{}", message.as_ref());
}

pub fn info(message: impl AsRef<str>) {
    tracing::info!(target: "taskmon", "{}", message.as_ref());
}

pub fn warn(message: impl AsRef<str>) {
    tracing::warn!(target: "taskmon", "{}", message.as_ref());
}
