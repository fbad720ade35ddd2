//! TradeFlow - Account Balance Feed Library
//!
//! This crate maintains an authenticated, per-account balance subscription
//! against a brokerage venue's streaming endpoint, with strict handshake
//! ordering and bounded reconnection.

pub mod config;
pub mod error;
pub mod listener;
pub mod protocol;

pub use config::FeedConfig;
pub use error::{BalanceFeedError, Result};
pub use listener::{
    BalanceHandler, BalanceListener, BalanceUpdate, CloseInfo, ConnectionState,
};
pub use protocol::{ClientRequest, InboundMessage};
