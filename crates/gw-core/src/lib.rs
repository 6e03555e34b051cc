//! Gatewarden core library
//!
//! Keeps an unattended camera access controller running:
//! - Integrity-checked backup and restore of device state
//! - Over-the-air updates with pre-update snapshot and rollback
//! - Progressive failure recovery for camera, network, memory, disk and
//!   service domains under a shared service-restart budget
//!
//! The binary entry point is in `main.rs`.

pub mod alert;
pub mod backup;
pub mod budget;
pub mod controllers;
pub mod daemon;
pub mod exit_codes;
pub mod fsutil;
pub mod logging;
pub mod recovery;
pub mod runtime;
pub mod update;
pub mod version;
