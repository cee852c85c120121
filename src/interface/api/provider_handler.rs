//! Provider status webhook

use super::dto::{respond, ApiResult};
use super::router::AppState;
use crate::domain::telephony::ProviderEvent;
use axum::{extract::State, Json};
use tracing::debug;

/// Feed one provider status report into the session machine
///
/// Reports for calls not yet registered are buffered, so this succeeds for
/// them too.
pub async fn provider_event(
    State(state): State<AppState>,
    Json(event): Json<ProviderEvent>,
) -> ApiResult<()> {
    debug!(
        "Provider webhook: call {} is {}",
        event.provider_call_id,
        event.status.as_str()
    );
    respond(state.sessions.handle_provider_event(event).await)
}
