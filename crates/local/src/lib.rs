// couchctl-local: bootstraps a local document-database server.

pub mod config;
pub mod controller;
pub mod detect;
pub mod error;
pub mod exec;
pub mod fsutil;
pub mod health;
pub mod ini;
pub mod launcher;
pub mod password;
pub mod runtime;
pub mod signal;
pub mod state;

pub use config::LaunchConfig;
pub use controller::{ControllerOptions, InstanceStatus, Lifecycle, LifecycleController, StartedInstance};
pub use error::LocalError;
pub use runtime::RuntimeKind;
pub use state::{FileStateStore, InstanceState, MemoryStateStore, StateStore};
