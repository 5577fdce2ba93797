//! Agent backends: the scripted mock and the external-command bridge.

pub mod command;
pub mod mock;
pub mod registry;

pub use command::CommandBackend;
pub use mock::{default_contract, default_suite, Capability, Invocation, MockBackend, ScriptedAttempt};
pub use registry::{BackendPair, BackendRegistry};
