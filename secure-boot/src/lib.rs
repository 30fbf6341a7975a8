//! Secure boot chain for ARMv8-M microcontrollers.
//!
//! Brings the platform up in a fixed order, loads a validated image out of one of several flash
//! slots, confines it behind hardware protection regions and hands control to it.

#![cfg_attr(not(test), no_std)]

pub mod boot;
pub mod config;
pub mod isolation;
pub mod loader;
pub mod logging;
pub mod region;
pub mod sequencer;
