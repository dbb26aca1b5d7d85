//! Database models: the Entity Store's row types.

pub mod deployment;
pub mod job;
pub mod project;

pub use deployment::*;
pub use job::*;
pub use project::*;
