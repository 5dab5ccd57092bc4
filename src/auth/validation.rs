use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::users::dto::NewUser;

pub const MIN_PASSWORD_CHARS: usize = 8;
pub const MAX_NAME_CHARS: usize = 50;
pub const MAX_EMAIL_CHARS: usize = 100;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("user id cannot be negative, got {0}")]
    NegativeId(i64),

    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("{field} is longer than {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("invalid email: {0}")]
    InvalidEmail(String),

    #[error("password must be at least {} characters", MIN_PASSWORD_CHARS)]
    PasswordTooShort,
}

pub fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn check_text(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty(field));
    }
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

/// Check the shape of a user before it reaches the store.
pub fn validate_new_user(user: &NewUser) -> Result<(), ValidationError> {
    if let Some(id) = user.id {
        if id < 0 {
            return Err(ValidationError::NegativeId(id));
        }
    }
    check_text("first_name", &user.first_name, MAX_NAME_CHARS)?;
    check_text("last_name", &user.last_name, MAX_NAME_CHARS)?;
    check_text("username", &user.username, MAX_NAME_CHARS)?;
    check_text("email", &user.email, MAX_EMAIL_CHARS)?;
    if !is_valid_email(&user.email) {
        return Err(ValidationError::InvalidEmail(user.email.clone()));
    }
    // Counted in characters, not bytes.
    if user.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(ValidationError::PasswordTooShort);
    }
    Ok(())
}
