//! Authentication binding middleware
//!
//! Reads the session cookie and, when it resolves to a live session with an
//! active user, attaches [`CurrentUser`] to the request. Absence never fails
//! the request here; downstream guards decide. Users flagged for a forced
//! password change are redirected to the change form from everywhere except
//! the form itself and logout.

use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use super::{client_ip, cookie_value};
use crate::domain::{Session, User};
use crate::error::Error;
use crate::state::AppState;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session_token";

/// Path of the forced password change form
pub const FORCE_CHANGE_PATH: &str = "/me/force-password-change";

/// Paths still reachable while a password change is being forced
const FORCE_CHANGE_EXEMPT: &[&str] = &[FORCE_CHANGE_PATH, "/auth/logout", "/health"];
const FORCE_CHANGE_EXEMPT_PREFIXES: &[&str] = &["/static/", "/uploads/"];

/// The authenticated user and session bound to this request
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub session: Session,
}

impl CurrentUser {
    /// Client IP recorded on the session, for audit context
    pub fn ip(&self) -> Option<String> {
        self.session.client_ip.clone()
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(Error::Unauthenticated)
    }
}

/// Optional variant for pages that render differently when signed in
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<CurrentUser>);

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(parts.extensions.get::<CurrentUser>().cloned()))
    }
}

/// The middleware itself
pub async fn auth_binding(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = cookie_value(request.headers(), SESSION_COOKIE) else {
        return next.run(request).await;
    };

    let bound = match state.read_handle() {
        Ok(conn) => match state.identity.validate_session(&conn, &token).await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!("Session validation failed: {}", e);
                None
            }
        },
        Err(e) => {
            tracing::error!("No read handle for session validation: {}", e);
            None
        }
    };

    let Some((user, mut session)) = bound else {
        return next.run(request).await;
    };

    // Record the request origin on the bound session for audit context
    if session.client_ip.is_none() {
        session.client_ip = client_ip(&request);
    }

    let must_change = user.must_change_password;
    request
        .extensions_mut()
        .insert(CurrentUser { user, session });

    if must_change && !force_change_exempt(request.uri().path()) {
        return Redirect::to(FORCE_CHANGE_PATH).into_response();
    }

    next.run(request).await
}

fn force_change_exempt(path: &str) -> bool {
    FORCE_CHANGE_EXEMPT.contains(&path)
        || FORCE_CHANGE_EXEMPT_PREFIXES
            .iter()
            .any(|prefix| path.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_change_exemptions() {
        assert!(force_change_exempt("/me/force-password-change"));
        assert!(force_change_exempt("/auth/logout"));
        assert!(force_change_exempt("/static/app.css"));
        assert!(!force_change_exempt("/dashboard"));
        assert!(!force_change_exempt("/packages"));
        assert!(!force_change_exempt("/me/password"));
    }
}
