//! Shared primitives: storage, the audit broker, typed cells, ordering and output.

pub mod broker;
pub mod cell;
pub mod config;
pub mod db;
pub mod error;
pub mod ordering;
pub mod output;
pub mod schemas;
pub mod store;
pub mod time;
