use std::collections::BTreeMap;

use garde::Validate;
use serde::{Deserialize, Serialize};

/// Expiry choices offered by the snippet form, in days.
pub const PERMITTED_EXPIRY_DAYS: [i32; 3] = [1, 7, 365];

#[allow(clippy::ptr_arg)]
fn not_blank(value: &String, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("This field cannot be blank"));
    }
    Ok(())
}

/// Parses a submitted expiry, accepting only the offered choices.
fn parse_expiry(value: &str) -> Option<i32> {
    value
        .trim()
        .parse()
        .ok()
        .filter(|days| PERMITTED_EXPIRY_DAYS.contains(days))
}

#[allow(clippy::ptr_arg)]
fn permitted_expiry(value: &String, _ctx: &()) -> garde::Result {
    match parse_expiry(value) {
        Some(_) => Ok(()),
        None => Err(garde::Error::new("This field must equal 1, 7 or 365")),
    }
}

/// Values and errors of a submitted form, echoed back when it is re-displayed.
#[derive(Debug, Default, Clone, Serialize)]
pub struct FormState {
    /// Submitted values, minus anything secret.
    pub values: BTreeMap<String, String>,
    /// Errors keyed by field name.
    pub errors: BTreeMap<String, String>,
    /// Errors not tied to one field.
    pub non_field_errors: Vec<String>,
}

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, field: &str, value: impl Into<String>) -> Self {
        self.values.insert(field.to_owned(), value.into());
        self
    }

    pub fn add_error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.entry(field.to_owned()).or_insert_with(|| message.into());
    }

    pub fn add_non_field_error(&mut self, message: impl Into<String>) {
        self.non_field_errors.push(message.into());
    }

    /// Records the first error garde reported for each field.
    pub fn add_report(&mut self, report: &garde::Report) {
        for (path, error) in report.iter() {
            self.add_error(&path.to_string(), error.message());
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.non_field_errors.is_empty()
    }
}

/// Validates `form` and collects its errors into `state`.
pub fn check<T: Validate<Context = ()>>(form: &T, state: &mut FormState) {
    if let Err(report) = form.validate() {
        state.add_report(&report);
    }
}

/// The create-snippet form.
#[derive(Debug, Deserialize, Validate)]
#[serde(default)]
pub struct SnippetForm {
    #[garde(length(chars, max = 100), custom(not_blank))]
    pub title: String,
    #[garde(custom(not_blank))]
    pub content: String,
    /// Kept as text so a bad choice is reported on the form.
    #[garde(custom(permitted_expiry))]
    pub expires: String,
}

impl Default for SnippetForm {
    fn default() -> Self {
        Self {
            title: String::new(),
            content: String::new(),
            expires: "365".to_string(),
        }
    }
}

impl SnippetForm {
    pub fn state(&self) -> FormState {
        FormState::new()
            .with_value("title", self.title.clone())
            .with_value("content", self.content.clone())
            .with_value("expires", self.expires.clone())
    }

    /// The chosen expiry in days, if it is one of the offered choices.
    pub fn expires_days(&self) -> Option<i32> {
        parse_expiry(&self.expires)
    }
}

/// The signup form.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct SignupForm {
    #[garde(custom(not_blank))]
    pub name: String,
    #[garde(email)]
    pub email: String,
    #[garde(length(min = 10))]
    pub password: String,
}

impl SignupForm {
    pub fn state(&self) -> FormState {
        FormState::new()
            .with_value("name", self.name.clone())
            .with_value("email", self.email.clone())
    }
}

/// The login form. Not validated field by field: any failure gets the same
/// generic message.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn state(&self) -> FormState {
        FormState::new().with_value("email", self.email.clone())
    }
}

/// The change-password form.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct ChangePasswordForm {
    #[garde(custom(not_blank))]
    pub current_password: String,
    #[garde(length(min = 10))]
    pub new_password: String,
    #[garde(matches(new_password))]
    pub new_password_confirmation: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_snippet_form() {
        let form = SnippetForm {
            title: "O snail".into(),
            content: "Climb Mount Fuji,\nBut slowly, slowly!".into(),
            expires: "7".into(),
        };
        let mut state = form.state();
        check(&form, &mut state);
        assert!(state.is_valid());
    }

    #[test]
    fn snippet_form_reports_each_field() {
        let form = SnippetForm {
            title: "x".repeat(101),
            content: "   ".into(),
            expires: "3".into(),
        };
        let mut state = form.state();
        check(&form, &mut state);

        assert!(state.errors.contains_key("title"));
        assert_eq!(
            state.errors.get("content").map(String::as_str),
            Some("This field cannot be blank")
        );
        assert!(state.errors.contains_key("expires"));
    }

    #[test]
    fn title_length_counts_characters() {
        let form = SnippetForm {
            title: "é".repeat(100),
            content: "body".into(),
            expires: "1".into(),
        };
        let mut state = form.state();
        check(&form, &mut state);
        assert!(state.is_valid());

        let form = SnippetForm {
            title: "é".repeat(101),
            ..form
        };
        let mut state = form.state();
        check(&form, &mut state);
        assert!(state.errors.contains_key("title"));
    }

    #[test]
    fn non_numeric_expiry_is_a_field_error() {
        let form = SnippetForm {
            title: "t".into(),
            content: "c".into(),
            expires: "abc".into(),
        };
        let mut state = form.state();
        check(&form, &mut state);

        assert_eq!(
            state.errors.get("expires").map(String::as_str),
            Some("This field must equal 1, 7 or 365")
        );
        assert_eq!(form.expires_days(), None);
        assert_eq!(SnippetForm::default().expires_days(), Some(365));
    }

    #[test]
    fn signup_form_checks_email_and_password_length() {
        let form = SignupForm {
            name: "Bob".into(),
            email: "not-an-email".into(),
            password: "short".into(),
        };
        let mut state = form.state();
        check(&form, &mut state);

        assert!(state.errors.contains_key("email"));
        assert!(state.errors.contains_key("password"));
        assert!(!state.values.contains_key("password"));
    }

    #[test]
    fn change_password_confirmation_must_match() {
        let form = ChangePasswordForm {
            current_password: "old-password".into(),
            new_password: "new-password-1".into(),
            new_password_confirmation: "new-password-2".into(),
        };
        let mut state = FormState::new();
        check(&form, &mut state);

        assert!(state.errors.contains_key("new_password_confirmation"));
        assert!(!state.errors.contains_key("new_password"));
    }

    #[test]
    fn first_error_per_field_wins() {
        let mut state = FormState::new();
        state.add_error("email", "first");
        state.add_error("email", "second");
        assert_eq!(state.errors.get("email").map(String::as_str), Some("first"));
    }
}
