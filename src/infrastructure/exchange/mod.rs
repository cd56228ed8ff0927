pub mod mock;
pub mod valr;
pub mod venue_breaker;

pub use mock::{MockEquityService, MockExchangeService, MockMarketService};
pub use valr::ValrExchangeService;
pub use venue_breaker::VenueBreaker;
