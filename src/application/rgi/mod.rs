pub mod aggregator;
pub mod governor;

pub use aggregator::TrustAggregator;
pub use governor::RewardGovernor;
