pub mod outbound;
pub mod retry;
