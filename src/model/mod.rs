//! Data model: identities, findings, issues and the registry snapshot.

pub mod finding;
pub mod issue;
pub mod registry;
pub mod types;
