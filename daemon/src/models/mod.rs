//! Domain models

pub mod deploy;
