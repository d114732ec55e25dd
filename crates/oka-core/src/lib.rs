//! # OkaProxy Core
//!
//! Building blocks shared by every listener:
//! - [`Stage`] and [`Pipeline`]: the ordered admission checks run before forwarding
//! - [`ClientIdentity`]: the per-request client key derived from forwarding headers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod identity;
pub mod pipeline;

pub use identity::{peer_addr, ClientIdentity};
pub use pipeline::{Pipeline, Stage, StageOutcome};
