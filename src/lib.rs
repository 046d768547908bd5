//! meshdetect library: portable Remote ID detection and relay logic.
//!
//! Sensing nodes decode Open Drone ID broadcasts from Wi-Fi and BLE, keep a
//! small table of the drones in range, and stream one NDJSON line per update
//! to USB serial and to a relay radio on a UART. A head-end reads the relay
//! stream, collapses the copies several nodes send for the same broadcast,
//! and passes clean detections on to the mapping application.
//!
//! Everything here is `no_std` with no allocator and runs on the host with
//! `cargo test`. The firmware binaries (`src/main.rs` for Embassy,
//! `firmware-std/` for ESP-IDF) provide radios, serial ports and timers.
//!
//! Node path: `scanner` → `odid` → `tracker` (via `pipeline`) → `comm::Emitter`.
//! Head-end path: `comm::LineReader` → `bridge` → `dedup`.

#![cfg_attr(not(test), no_std)]

pub mod board;
pub mod bridge;
pub mod channel;
pub mod comm;
pub mod config;
pub mod dedup;
pub mod odid;
pub mod pipeline;
pub mod protocol;
pub mod reader;
pub mod scanner;
pub mod tracker;
