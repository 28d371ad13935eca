//! Fleet coordinator for the signage gateway
//!
//! Owns the device registry, the content catalog and resolver, emergency
//! broadcast fan-out, and software update rollout. Devices talk to it over
//! HTTP with per-device credentials; dashboards use the unauthenticated
//! management routes behind the deployment's proxy.

pub mod api;
pub mod broadcast;
pub mod catalog;
pub mod context;
pub mod registry;
pub mod repository;
pub mod resolver;
pub mod server;
pub mod sweeper;
pub mod updates;
