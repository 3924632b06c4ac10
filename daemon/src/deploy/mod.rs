//! Deployment execution

pub mod dispatcher;
pub mod executor;
pub mod fsm;
pub mod locks;

pub use dispatcher::Dispatcher;
pub use executor::{CommandExecutor, CommandFailure, DeployError, DeployRunner, ExecutorOptions};
