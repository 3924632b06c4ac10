//! Wire models shared by the pushdeploy daemon and its clients.

pub mod models;

pub use models::*;
