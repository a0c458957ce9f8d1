//! Core domain types and logic.

pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod position;
pub mod trade;
pub mod trade_index;
pub mod window;
