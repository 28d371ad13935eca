//! Domain models shared by the coordinator and the player agent

pub mod api;
pub mod broadcast;
pub mod content;
pub mod device;
pub mod update;

pub use api::*;
pub use broadcast::*;
pub use content::*;
pub use device::*;
pub use update::*;
