use axum::{extract::State, response::Html};

use crate::server::AppState;

const HOME_PAGE: &str = include_str!("../../assets/home.html");

/// GET /home - landing page with a minimal lobby test client
pub async fn serve_home(State(state): State<AppState>) -> Html<String> {
    if let Some(path) = &state.settings.server.home_page {
        match tokio::fs::read_to_string(path).await {
            Ok(page) => return Html(page),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed to read home page, using bundled one")
            }
        }
    }
    Html(HOME_PAGE.to_string())
}
