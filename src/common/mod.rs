//! Shared infrastructure: process launching, filesystem confinement,
//! artifact fingerprinting.

pub mod command;
pub mod fingerprint;
pub mod jail;
pub mod schema;

pub use command::{CommandOutput, CommandRunner, CommandSpec};
pub use fingerprint::fingerprint_inputs;
pub use jail::Jail;
