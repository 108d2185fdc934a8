//! Types shared between the bridge core and its front-ends: the wire protocol,
//! the mod-manager records it carries, and the bridge error type.

pub mod domain;
pub mod error;
pub mod protocol;

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod protocol_tests;
