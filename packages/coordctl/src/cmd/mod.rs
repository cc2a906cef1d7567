//! Command implementations

pub mod cursor;
pub mod graph;
pub mod job;
pub mod lock;
pub mod run;
