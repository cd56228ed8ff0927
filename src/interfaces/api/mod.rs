pub mod auth;
pub mod hitl;
pub mod server;
pub mod webhook;

pub use server::{ApiState, build_router};
