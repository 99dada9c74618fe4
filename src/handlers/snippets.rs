use axum::{
    Form,
    extract::{FromRequestParts, Path, State, rejection::FormRejection},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Redirect, Response},
};

use crate::{
    error::{AppError, Result},
    session::{Session, handle::FLASH},
    state::AppState,
    validation::forms::{SnippetForm, check},
    views::{TemplateData, render},
};

/// A snippet id taken from the path.
///
/// Anything other than a run of ASCII digits naming an id of at least 1 is
/// treated as a missing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnippetId(pub i64);

impl SnippetId {
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        raw.parse::<i64>().ok().filter(|id| *id >= 1).map(SnippetId)
    }
}

impl<S> FromRequestParts<S> for SnippetId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::NotFound)?;
        SnippetId::parse(&raw).ok_or(AppError::NotFound)
    }
}

/// Home page: the latest snippets.
pub async fn home(State(state): State<AppState>, session: Session) -> Result<Response> {
    let snippets = state.snippets.latest().await?;
    let data = TemplateData::new(&session).await?.with_snippets(snippets);
    Ok(render(StatusCode::OK, data))
}

/// Shows one snippet.
pub async fn show_snippet(
    State(state): State<AppState>,
    session: Session,
    SnippetId(id): SnippetId,
) -> Result<Response> {
    let snippet = state.snippets.get(id).await?;
    let data = TemplateData::new(&session).await?.with_snippet(snippet);
    Ok(render(StatusCode::OK, data))
}

/// The empty create form.
pub async fn create_snippet_form(session: Session) -> Result<Response> {
    let form = SnippetForm::default().state();
    let data = TemplateData::new(&session).await?.with_form(form);
    Ok(render(StatusCode::OK, data))
}

/// Validates and stores a new snippet.
pub async fn create_snippet(
    State(state): State<AppState>,
    session: Session,
    form: std::result::Result<Form<SnippetForm>, FormRejection>,
) -> Result<Response> {
    let Form(form) = form.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let mut form_state = form.state();
    check(&form, &mut form_state);
    let expires = form.expires_days().filter(|_| form_state.is_valid());
    let Some(expires) = expires else {
        let data = TemplateData::new(&session).await?.with_form(form_state);
        return Ok(render(StatusCode::UNPROCESSABLE_ENTITY, data));
    };

    let id = state
        .snippets
        .insert(form.title.trim(), &form.content, expires)
        .await?;

    tracing::info!("✅ Snippet created: {}", id);
    session.put(FLASH, "Snippet successfully created!");

    Ok(Redirect::to(&format!("/snippet/{}", id)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_id_accepts_plain_positive_numbers() {
        assert_eq!(SnippetId::parse("1"), Some(SnippetId(1)));
        assert_eq!(SnippetId::parse("0042"), Some(SnippetId(42)));
    }

    #[test]
    fn snippet_id_rejects_everything_else() {
        for raw in ["", "0", "-1", "+1", "abc", "1.5", " 1", "99999999999999999999"] {
            assert_eq!(SnippetId::parse(raw), None, "{raw:?} should be rejected");
        }
    }
}
