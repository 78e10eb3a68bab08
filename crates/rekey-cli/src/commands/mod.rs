//! Command implementations

pub mod mode;
pub mod replicas;
pub mod run;
pub mod status;
