//! API interface implementations

pub mod calls_handler;
pub mod dialer_handler;
pub mod dto;
pub mod ledger_handler;
pub mod metrics_handler;
pub mod provider_handler;
pub mod router;
pub mod ws_handler;

pub use dto::ApiResponse;
pub use metrics_handler::init_metrics;
pub use router::{build_router, AppState};
