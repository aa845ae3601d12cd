//! services/api/src/web/middleware.rs
//!
//! Caller-identity middleware. Authentication itself lives outside this
//! service; requests arrive with an `x-user-id` header already validated
//! upstream, and this middleware turns it into a `Caller` for handlers.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use challenge_picker_core::domain::Caller;

/// Resolves the optional `x-user-id` header into a `Caller`.
///
/// A missing header is an anonymous caller (viewers may browse dashboards
/// unless the session requires auth); a malformed one is rejected outright.
pub async fn identify_caller(mut req: Request, next: Next) -> Result<Response, (StatusCode, String)> {
    let caller = match req.headers().get("x-user-id") {
        None => Caller::anonymous(),
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid x-user-id header".to_string()))?;
            let user_id = Uuid::parse_str(raw)
                .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid x-user-id format".to_string()))?;
            Caller::user(user_id)
        }
    };

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
