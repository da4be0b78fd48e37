//! CLI command implementations.

mod config;
mod ctrl_space;
mod pool;
mod queue;
mod simulate;

pub use config::{config, ConfigCommand};
pub use ctrl_space::{ctrl_space, CtrlSpaceCommand};
pub use pool::{pool, PoolCommand};
pub use queue::{queue, QueueCommand};
pub use simulate::{simulate, SimulateArgs};
