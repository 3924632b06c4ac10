//! Server state

use std::sync::Arc;

use crate::config::Config;
use crate::deploy::Dispatcher;
use crate::store::DeployStore;

/// Server state shared across handlers
pub struct ServerState {
    pub config: Arc<Config>,
    pub store: Arc<dyn DeployStore>,
    pub dispatcher: Arc<Dispatcher>,
}

impl ServerState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn DeployStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            store,
            dispatcher,
        }
    }
}
