//! Core modules shared by every routing component: storage layout,
//! configuration, brokered database access and output helpers.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod gate;
pub mod output;
pub mod schemas;
pub mod store;
pub mod time;
