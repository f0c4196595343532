pub mod archive;
pub mod cert;
pub mod clienv;
pub mod completions;
pub mod console;
pub mod error;
pub mod exec;
pub mod fetcher;
pub mod fsutil;
pub mod health;
pub mod installer;
pub mod lock;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod secrets;
pub mod settings;
pub mod state;
pub mod synth;
pub mod system;
pub mod unit;

#[cfg(test)]
mod testing;

pub use error::{ManagerError, Result};
pub use installer::Installer;
pub use orchestrator::{Host, Orchestrator};
pub use protocol::{Installable, ProtocolKind};
pub use registry::ProtocolRegistry;
