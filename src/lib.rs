//! tradewindow: streaming trade and market-window reconciliation engine.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], runtime wiring in [`service`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
pub mod service;
