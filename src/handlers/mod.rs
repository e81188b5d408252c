// handlers/mod.rs - Endpoints that are not manager operations
//
// Entity endpoints live in managers/ and are wired up by routes/. What is
// left here reports on the running service itself.

pub mod system;

pub use system::{register_debug, register_public, SystemInfo};
