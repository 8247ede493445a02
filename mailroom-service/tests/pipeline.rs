//! End-to-end exercises of the request pipeline: login flow, CSRF
//! enforcement, rate limiting, security headers, and guarded admin actions.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use mailroom_service::auth::NewUser;
use mailroom_service::config::Config;
use mailroom_service::domain::{Role, User};
use mailroom_service::routes;
use mailroom_service::state::AppState;

const OPERATOR_PASSWORD: &str = "Correct-Horse-9!";
const ADMIN_PASSWORD: &str = "Admin-Horse-22$";

struct Harness {
    state: AppState,
    app: Router,
    _dir: TempDir,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.database.path = dir.path().join("pipeline.db");
    config.uploads.dir = dir.path().join("uploads");
    config.passwords.argon2_time_cost = 1;
    config.passwords.argon2_memory_cost_kib = 1024;
    config.logins.failure_delay_ms = 0;
    config.rate_limit.login_per_minute = 5;

    let state = AppState::initialize(config).await.unwrap();

    let bootstrap = User {
        id: Uuid::new_v4(),
        username: "bootstrap".into(),
        password_hash: "unused".into(),
        full_name: "Bootstrap".into(),
        role: Role::SuperAdmin,
        is_active: true,
        must_change_password: false,
        password_history: Vec::new(),
        failed_login_count: 0,
        locked_until: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    state
        .identity
        .create_user(
            &bootstrap,
            NewUser {
                username: "jdoe".into(),
                password: OPERATOR_PASSWORD.into(),
                full_name: "Jane Doe".into(),
                role: Role::Operator,
            },
            None,
        )
        .await
        .unwrap();
    state
        .identity
        .create_user(
            &bootstrap,
            NewUser {
                username: "boss".into(),
                password: ADMIN_PASSWORD.into(),
                full_name: "Big Boss".into(),
                role: Role::Admin,
            },
            None,
        )
        .await
        .unwrap();

    let app = routes::router(state.clone());
    Harness {
        state,
        app,
        _dir: dir,
    }
}

fn set_cookie_value(response: &axum::response::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{}=", name)))
        .and_then(|v| v.split(';').next())
        .and_then(|pair| pair.split_once('='))
        .map(|(_, value)| value.to_string())
}

async fn fetch_csrf_cookie(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/auth/login")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    set_cookie_value(&response, "csrf_token").expect("csrf cookie issued on first response")
}

async fn login(app: &Router, username: &str, password: &str) -> (String, String) {
    let csrf = fetch_csrf_cookie(app).await;
    let body = format!(
        "username={}&password={}&csrf_token={}",
        username,
        urlencode(password),
        csrf
    );
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(header::COOKIE, format!("csrf_token={}", csrf))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK, "login should succeed");
    let session = set_cookie_value(&response, "session_token").expect("session cookie");
    (session, csrf)
}

fn urlencode(value: &str) -> String {
    let mut out = String::new();
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[tokio::test]
async fn test_root_redirects_to_login() {
    let h = harness().await;
    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.status().is_redirection());
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/auth/login"
    );
    h.state.shutdown().await;
}

#[tokio::test]
async fn test_health_is_public_and_hardened() {
    let h = harness().await;
    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    h.state.shutdown().await;
}

#[tokio::test]
async fn test_login_sets_session_cookie_and_identity_works() {
    let h = harness().await;
    let (session, _) = login(&h.app, "jdoe", OPERATOR_PASSWORD).await;
    assert!(session.len() >= 43);

    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/auth/me")
                .header(header::COOKIE, format!("session_token={}", session))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    h.state.shutdown().await;
}

#[tokio::test]
async fn test_me_requires_session() {
    let h = harness().await;
    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/auth/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    h.state.shutdown().await;
}

#[tokio::test]
async fn test_csrf_missing_cookie_is_403() {
    let h = harness().await;
    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("username=jdoe&password=whatever"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    // The refusal still seeds the browser with a cookie for the retry
    assert!(set_cookie_value(&response, "csrf_token").is_some());
    h.state.shutdown().await;
}

#[tokio::test]
async fn test_csrf_header_mismatch_is_403() {
    let h = harness().await;
    let (session, csrf) = login(&h.app, "jdoe", OPERATOR_PASSWORD).await;

    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/packages/00000000-0000-0000-0000-000000000000/status")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(
                    header::COOKIE,
                    format!("session_token={}; csrf_token={}", session, csrf),
                )
                .header("x-csrf-token", "not-the-cookie-value")
                .body(Body::from("status=delivered"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    h.state.shutdown().await;
}

#[tokio::test]
async fn test_wrong_password_is_generic_401() {
    let h = harness().await;
    let csrf = fetch_csrf_cookie(&h.app).await;
    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(header::COOKIE, format!("csrf_token={}", csrf))
                .body(Body::from(format!(
                    "username=jdoe&password=Wrong-Horse-0%3F&csrf_token={}",
                    csrf
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    h.state.shutdown().await;
}

#[tokio::test]
async fn test_login_rate_limit_returns_429_with_retry_after() {
    let h = harness().await;
    let csrf = fetch_csrf_cookie(&h.app).await;

    // The harness allows 5 login requests per window; the cookie fetch above
    // hit /auth/login once already.
    let mut last = None;
    for _ in 0..5 {
        let response = h
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/login")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .header(header::COOKIE, format!("csrf_token={}", csrf))
                    .body(Body::from(format!(
                        "username=ghost&password=Nope-Nope-1%21&csrf_token={}",
                        csrf
                    )))
                    .unwrap(),
            )
            .await
            .unwrap();
        last = Some(response);
    }

    let response = last.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "60");
    h.state.shutdown().await;
}

#[tokio::test]
async fn test_operator_cannot_reach_admin_routes() {
    let h = harness().await;
    let (session, _) = login(&h.app, "jdoe", OPERATOR_PASSWORD).await;

    for uri in ["/admin/recipients", "/admin/reports", "/admin/audit-logs"] {
        let response = h
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header(header::COOKIE, format!("session_token={}", session))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{}", uri);
    }
    h.state.shutdown().await;
}

#[tokio::test]
async fn test_recipient_deactivation_blocked_over_http() {
    let h = harness().await;
    let (admin_session, admin_csrf) = login(&h.app, "boss", ADMIN_PASSWORD).await;

    // Seed a recipient with an open package through the service layer
    let conn = h.state.read_handle().unwrap();
    let admin = h
        .state
        .identity
        .user_by_username(&conn, "boss")
        .await
        .unwrap()
        .unwrap();
    let recipient = h
        .state
        .packages
        .create_recipient(
            &admin,
            mailroom_service::packages::NewRecipient {
                employee_id: "E900".into(),
                name: "Busy Recipient".into(),
                email: "busy@example.com".into(),
                department: "Ops".into(),
                phone: None,
                location: None,
            },
            None,
        )
        .await
        .unwrap();
    h.state
        .packages
        .register(
            &conn,
            &admin,
            mailroom_service::packages::NewPackage {
                tracking_no: "1Z-OPEN".into(),
                carrier: "UPS".into(),
                recipient_id: recipient.id,
                notes: None,
            },
            None,
            None,
        )
        .await
        .unwrap();

    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/admin/recipients/{}/deactivate", recipient.id))
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(
                    header::COOKIE,
                    format!(
                        "session_token={}; csrf_token={}",
                        admin_session, admin_csrf
                    ),
                )
                .header("x-csrf-token", admin_csrf.clone())
                .body(Body::from(""))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let still_active = h
        .state
        .packages
        .recipient_by_id(&conn, recipient.id)
        .await
        .unwrap()
        .unwrap();
    assert!(still_active.is_active);

    h.state.shutdown().await;
}
