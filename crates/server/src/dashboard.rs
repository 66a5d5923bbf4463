//! Minimal embedded dashboard (delivery mechanism only, no new semantics).

use axum::response::{Html, IntoResponse};

const DASHBOARD_HTML: &str = include_str!("../assets/dashboard.html");

pub async fn serve() -> impl IntoResponse {
    Html(DASHBOARD_HTML)
}
