//! Interface layer - External interfaces
//!
//! This layer handles:
//! - REST API endpoints for operators and the provider webhook
//! - WebSocket event streaming
//! - Request/response formatting

pub mod api;
