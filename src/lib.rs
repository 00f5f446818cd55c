//! Control plane for a dual-channel IIR/PID filter board.
//!
//! Filter and gain selections are turned into biquad or PID settings,
//! checked against each channel's electrical limits and delivered through a
//! hold, reload, run handshake so the board never runs a half-written
//! filter.
pub mod channel;
pub mod config;
pub mod device;
pub mod overrides;
pub mod safety;
pub mod session;
pub mod signal;
pub mod units;
