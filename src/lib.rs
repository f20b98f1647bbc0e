pub mod models;
pub mod command;
pub mod parser;
pub mod runner;
pub mod profiles;
pub mod cli;

/// Task registry over local supervisors
pub mod daemon;

/// Report export
pub mod reporting;
