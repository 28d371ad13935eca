//! # Signage Gateway Player Agent
//!
//! Daemon running on each playback device. It registers with the
//! coordinator, keeps a hash-addressed local cache of video content, drives
//! the media player process, and runs the sync loops that pull content
//! decisions, emergency broadcasts, device config, and software updates.

pub mod agent;
pub mod cache;
pub mod client;
pub mod config;
pub mod identity;
pub mod playback;
pub mod updater;
