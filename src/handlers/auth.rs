use axum::{
    Form,
    extract::{State, rejection::FormRejection},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};

use crate::{
    error::{AppError, Result},
    middleware_layer::auth::CurrentUser,
    models::error::ModelError,
    session::{
        Session,
        handle::{AUTH_USER_ID, FLASH, REDIRECT_AFTER_LOGIN},
    },
    state::AppState,
    validation::forms::{ChangePasswordForm, FormState, LoginForm, SignupForm, check},
    views::{TemplateData, render},
};

/// Where a fresh login lands when no other destination was remembered.
const DEFAULT_AFTER_LOGIN: &str = "/snippet/create";

fn parse_form<T>(form: std::result::Result<Form<T>, FormRejection>) -> Result<T> {
    form.map(|Form(inner)| inner)
        .map_err(|e| AppError::BadRequest(e.body_text()))
}

/// Only same-site absolute paths are followed after login.
fn is_local_path(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.starts_with("/\\")
}

async fn redisplay(session: &Session, form: FormState) -> Result<Response> {
    let data = TemplateData::new(session).await?.with_form(form);
    Ok(render(StatusCode::UNPROCESSABLE_ENTITY, data))
}

/// The empty signup form.
pub async fn signup_form(session: Session) -> Result<Response> {
    let data = TemplateData::new(&session).await?.with_form(FormState::new());
    Ok(render(StatusCode::OK, data))
}

/// Creates an account.
pub async fn signup(
    State(state): State<AppState>,
    session: Session,
    form: std::result::Result<Form<SignupForm>, FormRejection>,
) -> Result<Response> {
    let form = parse_form(form)?;

    let mut form_state = form.state();
    check(&form, &mut form_state);
    if !form_state.is_valid() {
        return redisplay(&session, form_state).await;
    }

    match state
        .credentials
        .insert(&form.name, &form.email, &form.password)
        .await
    {
        Ok(id) => tracing::info!("✅ User registered: {}", id),
        Err(ModelError::DuplicateEmail) => {
            form_state.add_error("email", "Address is already in use");
            return redisplay(&session, form_state).await;
        }
        Err(e) => return Err(e.into()),
    }

    session.put(FLASH, "Your signup was successful. Please log in.");
    Ok(Redirect::to("/user/login").into_response())
}

/// The empty login form.
pub async fn login_form(session: Session) -> Result<Response> {
    let data = TemplateData::new(&session).await?.with_form(FormState::new());
    Ok(render(StatusCode::OK, data))
}

/// Signs a user in.
///
/// Every failure produces the same message, whatever the cause.
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    form: std::result::Result<Form<LoginForm>, FormRejection>,
) -> Result<Response> {
    let form = parse_form(form)?;
    let mut form_state = form.state();

    let outcome = if form.email.trim().is_empty() || form.password.is_empty() {
        Err(ModelError::InvalidCredentials)
    } else {
        state.credentials.authenticate(&form.email, &form.password).await
    };

    let user_id = match outcome {
        Ok(id) => id,
        Err(ModelError::InvalidCredentials) => {
            form_state.add_non_field_error("Email or password is incorrect");
            return redisplay(&session, form_state).await;
        }
        Err(e) => return Err(e.into()),
    };

    session.renew();
    session.put(AUTH_USER_ID, user_id.to_string());

    let target = session
        .pop(REDIRECT_AFTER_LOGIN)
        .await?
        .filter(|target| is_local_path(target))
        .unwrap_or_else(|| DEFAULT_AFTER_LOGIN.to_string());

    tracing::info!("✅ User logged in: {}", user_id);
    Ok(Redirect::to(&target).into_response())
}

/// Signs the user out.
pub async fn logout(session: Session) -> Result<Response> {
    let user_id = session.user_id();

    session.remove(AUTH_USER_ID);
    session.renew();
    session.put(FLASH, "You've been logged out successfully!");

    if let Some(id) = user_id {
        tracing::info!("✅ User logged out: {}", id);
    }
    Ok(Redirect::to("/").into_response())
}

/// The signed-in user's account page.
pub async fn profile(
    State(state): State<AppState>,
    session: Session,
    current: CurrentUser,
) -> Result<Response> {
    let user = state.credentials.get(current.id).await?;
    let data = TemplateData::new(&session).await?.with_user(user);
    Ok(render(StatusCode::OK, data))
}

/// The empty change-password form.
pub async fn change_password_form(session: Session) -> Result<Response> {
    let data = TemplateData::new(&session).await?.with_form(FormState::new());
    Ok(render(StatusCode::OK, data))
}

/// Replaces the signed-in user's password.
pub async fn change_password(
    State(state): State<AppState>,
    session: Session,
    current: CurrentUser,
    form: std::result::Result<Form<ChangePasswordForm>, FormRejection>,
) -> Result<Response> {
    let form = parse_form(form)?;

    let mut form_state = FormState::new();
    check(&form, &mut form_state);
    if !form_state.is_valid() {
        return redisplay(&session, form_state).await;
    }

    match state
        .credentials
        .change_password(current.id, &form.current_password, &form.new_password)
        .await
    {
        Ok(()) => {}
        Err(ModelError::InvalidCredentials) => {
            form_state.add_error("current_password", "Current password is incorrect");
            return redisplay(&session, form_state).await;
        }
        Err(e) => return Err(e.into()),
    }

    session.put(FLASH, "Your password has been updated!");
    Ok(Redirect::to("/user/profile").into_response())
}
