//! Per-resource synchronization
//!
//! Each subscription owns an isolated slice of state, wires it to one or
//! more live connections, applies incoming events through a pure reducer,
//! and publishes `{data, loading, error, progress}` views over a watch
//! channel. Every mount is an independent subscription; there is no
//! cross-subscription cache.
//!
//! # Subscriptions
//!
//! - `JobProgressSubscription` - one job's progress, transactions, and
//!   authoritative final result
//! - `JobListingSubscription` / `BacktestHistorySubscription` - keyed,
//!   ordered listings
//! - `IntervalDataSubscription` - historical bars across parallel
//!   per-interval streams, with a REST polling fallback
//! - `StrategyStatusSubscription` - deployed strategy status/performance

pub mod fallback;
pub mod intervals;
pub mod job;
pub mod listings;
pub mod strategies;

pub use fallback::{reconcile, resolve_completion};
pub use intervals::{IntervalDataSubscription, IntervalDataView, SubscriptionKey};
pub use job::{JobPhase, JobProgressSubscription, JobProgressView};
pub use listings::{
    apply, BacktestHistorySubscription, JobListingSubscription, Keyed, ListingEvent, ListingView,
};
pub use strategies::{apply_strategy_event, StrategyEvent, StrategyStatusSubscription, StrategyStatusView};
