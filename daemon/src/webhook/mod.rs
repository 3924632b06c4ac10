//! Inbound push webhook: authentication and deployment matching

pub mod matcher;
pub mod signature;

pub use matcher::match_deployment;
pub use signature::verify_signature;

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Header carrying the host's delivery id, used for log correlation
pub const DELIVERY_HEADER: &str = "x-github-delivery";
