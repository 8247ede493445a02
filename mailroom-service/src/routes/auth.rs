//! Login and logout routes

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Redirect, Response},
    Extension, Form, Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::Result;
use crate::middleware::auth::FORCE_CHANGE_PATH;
use crate::middleware::{
    clear_session_cookie, session_cookie, verify_csrf_field, CsrfExpectation, MaybeUser,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub csrf_token: Option<String>,
}

/// `GET /` — everything starts at the login page
pub async fn root() -> Redirect {
    Redirect::to("/auth/login")
}

/// `GET /auth/login` — login page payload (rendering is the template
/// layer's concern)
pub async fn login_page(MaybeUser(current): MaybeUser) -> Json<serde_json::Value> {
    Json(json!({
        "page": "login",
        "authenticated": current.is_some(),
    }))
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<AppState>,
    expectation: Option<Extension<CsrfExpectation>>,
    client_ip: ClientIp,
    user_agent: UserAgent,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        form.csrf_token.as_deref(),
    )?;

    let conn = state.read_handle()?;
    let (user, session) = state
        .identity
        .login(
            &conn,
            form.username.trim(),
            &form.password,
            client_ip.0.clone(),
            user_agent.0.clone(),
        )
        .await?;

    let redirect_url = if user.must_change_password {
        FORCE_CHANGE_PATH
    } else {
        "/dashboard"
    };

    let body = Json(json!({
        "success": true,
        "redirect_url": redirect_url,
        "user": user.view(),
    }));

    let mut response = body.into_response();
    if let Ok(cookie) = session_cookie(&session.token, state.config.is_production()).parse() {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct LogoutForm {
    #[serde(default)]
    pub csrf_token: Option<String>,
}

/// `POST /auth/logout` — clears every session for the user
pub async fn logout(
    State(state): State<AppState>,
    MaybeUser(current): MaybeUser,
    expectation: Option<Extension<CsrfExpectation>>,
    Form(form): Form<LogoutForm>,
) -> Result<Response> {
    verify_csrf_field(
        expectation.as_ref().map(|Extension(e)| e),
        form.csrf_token.as_deref(),
    )?;

    if let Some(current) = current {
        state
            .identity
            .logout(&current.user, current.ip())
            .await?;
    }

    let mut response = Redirect::to("/auth/login").into_response();
    if let Ok(cookie) = clear_session_cookie(state.config.is_production()).parse() {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    Ok(response)
}

/// Extractor for the request's best-effort client IP
#[derive(Debug, Clone)]
pub struct ClientIp(pub Option<String>);

impl<S> axum::extract::FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let ip = forwarded.or_else(|| {
            parts
                .extensions
                .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        });
        Ok(ClientIp(ip))
    }
}

/// Extractor for the User-Agent header
#[derive(Debug, Clone)]
pub struct UserAgent(pub Option<String>);

impl<S> axum::extract::FromRequestParts<S> for UserAgent
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(UserAgent(
            parts
                .headers
                .get(header::USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        ))
    }
}
