//! Real-time market signal pipeline.
//!
//! Bars from a market data feed are aggregated into timeframe candles,
//! run through a technical indicator engine and evaluated against a
//! declarative rule. Rule hits that clear the per-symbol cooldown become
//! [`Signal`](models::Signal)s handed to a [`SignalSink`](sink::SignalSink).
//!
//! [`FeedOrchestrator`](orchestrator::FeedOrchestrator) ties the stages
//! together and owns connection lifecycle, subscriptions and reconnection.

pub mod aggregator;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod feed;
pub mod indicators;
pub mod models;
pub mod orchestrator;
pub mod rules;
pub mod sink;
pub mod websocket;

pub use error::{Result, SignalGenError};
