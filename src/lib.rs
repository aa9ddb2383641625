/* Lockstep Lobby Lib */

pub mod common;
pub mod server;

pub use self::server::*;
