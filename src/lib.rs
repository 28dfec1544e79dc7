//! trace-walker library crate
//!
//! This module exposes internal types for integration testing.
//! The main binary is in main.rs.

#[macro_use]
extern crate log;

pub mod buffer;
pub mod config;
pub mod constants;
pub mod event;
pub mod gemini;
pub mod output;
pub mod pcm;
pub mod playback;
pub mod speech;
pub mod stdin;
pub mod trace;
pub mod view;

#[cfg(test)]
mod trace_tests;
