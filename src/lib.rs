//! forensic-usb -- trusted-binary live response collection for macOS endpoints.
//!
//! The crate prepares a USB stick with copies of the system binaries, sets up
//! a terminal that runs only those binaries, and collects volatile and
//! persistent evidence from the target onto an output medium, finishing with
//! a SHA-256 manifest of everything written.

pub mod acquire;
pub mod collect;
pub mod config;
pub mod manifest;
pub mod prepare;
pub mod runner;
pub mod status;
pub mod terminal;
pub mod volumes;
pub mod worker;
