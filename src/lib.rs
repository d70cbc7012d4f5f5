//! Ethernet to UART bridge bootstrap for ESP32 boards
//!
//! Everything outside [`esp`] is plain Rust behind small traits and is tested on the
//! host. The `esp` module wires those traits to ESP-IDF.

pub mod bridge;
pub mod config;
pub mod config_mode;
pub mod events;
pub mod network;
pub mod storage;
pub mod web;

#[cfg(target_os = "espidf")]
pub mod esp;
