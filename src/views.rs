use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{Datelike, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::{snippet::Snippet, user::User};
use crate::session::{Session, handle::FLASH};
use crate::validation::forms::FormState;

/// Data handed to a page template.
///
/// Pages are delivered as this JSON document; turning it into HTML is the
/// client's business.
#[derive(Debug, Serialize)]
pub struct TemplateData {
    pub current_year: i32,
    pub flash: Option<String>,
    pub is_authenticated: bool,
    pub csrf_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<FormState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<Snippet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippets: Option<Vec<Snippet>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl TemplateData {
    /// Fills in what every page shows. Consumes the pending flash message.
    pub async fn new(session: &Session) -> Result<Self> {
        Ok(Self {
            current_year: Utc::now().year(),
            flash: session.pop(FLASH).await?,
            is_authenticated: session.user_id().is_some(),
            csrf_token: session.csrf_token(),
            form: None,
            snippet: None,
            snippets: None,
            user: None,
        })
    }

    pub fn with_form(mut self, form: FormState) -> Self {
        self.form = Some(form);
        self
    }

    pub fn with_snippet(mut self, snippet: Snippet) -> Self {
        self.snippet = Some(snippet);
        self
    }

    pub fn with_snippets(mut self, snippets: Vec<Snippet>) -> Self {
        self.snippets = Some(snippets);
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }
}

/// Renders a page with the given status.
pub fn render(status: StatusCode, data: TemplateData) -> Response {
    (status, Json(data)).into_response()
}
