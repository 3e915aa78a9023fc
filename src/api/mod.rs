//! REST API client
//!
//! Thin typed wrappers over the backend's REST surface, one file per
//! endpoint group:
//!
//! - `jobs` - backtest job CRUD and fetch-by-id
//! - `credentials` - broker credentials and the Zerodha OAuth flow
//! - `strategies` - strategy editing
//! - `history` - historical OHLCV data by resource id
//!
//! Streamed payloads are summaries; whenever a subscription needs the
//! authoritative state it comes back through this client.

mod client;
mod credentials;
mod history;
mod jobs;
mod strategies;

pub use client::ApiClient;
pub use credentials::{BrokerCredential, OAuthInitiate, OAuthStatus, SaveCredentialRequest};
pub use history::HistoryResponse;
pub use jobs::CreateJobRequest;
pub use strategies::{CreateStrategyRequest, UpdateStrategyRequest};
