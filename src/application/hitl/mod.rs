pub mod expiry_worker;
pub mod gateway;
pub mod slippage;

pub use expiry_worker::ExpiryWorker;
pub use gateway::{CreateOutcome, HitlConfig, HitlGateway, PendingReport, RecoveryReport};
pub use slippage::SlippageGuard;
