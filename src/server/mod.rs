/* Server */

pub mod error;
pub mod event;
pub mod host;
pub mod limits;
pub mod lobby;
pub mod message;
pub mod player;
pub mod session;
pub mod settings;
pub mod slot;
pub mod wire;

#[cfg(test)]
mod testclient;

pub use self::error::Error;
pub use self::session::{Session, Stage};
pub use self::settings::{Config, Settings};
