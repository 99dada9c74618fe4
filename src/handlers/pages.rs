use axum::{http::StatusCode, response::Response};

use crate::{
    error::{AppError, Result},
    session::Session,
    views::{TemplateData, render},
};

/// The about page.
pub async fn about(session: Session) -> Result<Response> {
    let data = TemplateData::new(&session).await?;
    Ok(render(StatusCode::OK, data))
}

/// Liveness probe. Goes through the standard tier only.
pub async fn ping() -> &'static str {
    "OK"
}

/// Fallback for paths no route matches.
pub async fn not_found() -> AppError {
    AppError::NotFound
}
