//! Route table and pipeline assembly
//!
//! Exact paths are load-bearing: operators' bookmarks and printed stickers
//! point at them.

pub mod account;
pub mod admin_recipients;
pub mod admin_settings;
pub mod admin_users;
pub mod auth;
pub mod packages;
pub mod recipients;
pub mod reports;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::health;
use crate::middleware::{apply_security_headers, auth_binding, csrf_guard, rate_limit_guard};
use crate::state::AppState;

/// Build the full application router with the request pipeline applied
///
/// Request path order: authentication binding -> CSRF -> rate limit ->
/// security headers -> handler. Layers added later sit further out, so they
/// are stacked in reverse below.
pub fn router(state: AppState) -> Router {
    let app = Router::new()
        // Public
        .route("/", get(auth::root))
        .route("/health", get(health::health))
        .route("/auth/login", get(auth::login_page).post(auth::login))
        .route("/auth/logout", post(auth::logout))
        // Authenticated, all roles
        .route("/auth/me", get(account::me))
        .route(
            "/me/password",
            get(account::password_page).post(account::change_password),
        )
        .route(
            "/me/force-password-change",
            get(account::password_page).post(account::change_password),
        )
        .route("/me/profile", get(account::profile))
        .route("/me/sessions", get(account::sessions))
        .route(
            "/me/sessions/{id}/terminate",
            post(account::terminate_session),
        )
        .route("/dashboard", get(packages::dashboard))
        .route("/packages", get(packages::list))
        .route(
            "/packages/new",
            get(packages::new_form).post(packages::register),
        )
        .route("/packages/{id}", get(packages::detail))
        .route("/packages/{id}/status", post(packages::change_status))
        .route("/packages/{id}/photo", post(packages::add_photo))
        .route("/packages/{id}/qrcode/download", get(packages::qrcode))
        .route("/packages/{id}/qrcode/print", get(packages::qrcode))
        .route("/recipients", get(recipients::list))
        .route("/recipients/search", get(recipients::search))
        // Admin and super_admin
        .route("/admin/dashboard", get(admin_settings::dashboard))
        .route("/admin/users", get(admin_users::list))
        .route(
            "/admin/users/new",
            get(admin_users::new_form).post(admin_users::create),
        )
        .route(
            "/admin/users/{id}/edit",
            get(admin_users::edit_form).put(admin_users::edit),
        )
        .route("/admin/users/{id}/deactivate", post(admin_users::deactivate))
        .route("/admin/users/{id}/password", post(admin_users::reset_password))
        .route("/admin/recipients", get(admin_recipients::list))
        .route(
            "/admin/recipients/new",
            get(admin_recipients::new_form).post(admin_recipients::create),
        )
        .route(
            "/admin/recipients/{id}/edit",
            get(admin_recipients::edit_form)
                .post(admin_recipients::edit)
                .put(admin_recipients::edit),
        )
        .route(
            "/admin/recipients/{id}/deactivate",
            post(admin_recipients::deactivate),
        )
        .route(
            "/admin/recipients/import",
            get(admin_recipients::import_form),
        )
        .route(
            "/admin/recipients/import/validate",
            post(admin_recipients::import_validate),
        )
        .route(
            "/admin/recipients/import/confirm",
            post(admin_recipients::import_confirm),
        )
        .route("/admin/reports", get(reports::page))
        .route("/admin/reports/preview", get(reports::preview))
        .route("/admin/reports/export", get(reports::export))
        // Super admin only
        .route("/admin/settings", get(admin_settings::settings_page))
        .route(
            "/admin/settings/qr-base-url",
            post(admin_settings::set_qr_base_url),
        )
        .route("/admin/audit-logs", get(admin_settings::audit_logs));

    let app = apply_security_headers(app, state.config.is_production());

    app.layer(from_fn_with_state(state.clone(), rate_limit_guard))
        .layer(from_fn_with_state(state.clone(), csrf_guard))
        .layer(from_fn_with_state(state.clone(), auth_binding))
        .with_state(state)
}
