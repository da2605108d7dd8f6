//! Input validation for sign-in and registration

use regex::Regex;
use std::sync::OnceLock;

use common::FieldError;

use crate::models::{LoginCredentials, SignUpRequest};

/// Minimum password length accepted by the backend
pub const MIN_PASSWORD_LEN: usize = 6;

/// Validate email
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email must be at most 254 characters long".to_string());
    }

    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    if !regex.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate password
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }

    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LEN
        ));
    }

    if password.len() > 128 {
        return Err("Password must be at most 128 characters long".to_string());
    }

    Ok(())
}

/// Validate the display name given at registration
pub fn validate_full_name(full_name: &str) -> Result<(), String> {
    let full_name = full_name.trim();
    if full_name.is_empty() {
        return Err("Full name is required".to_string());
    }

    if full_name.chars().count() > 100 {
        return Err("Full name must be at most 100 characters long".to_string());
    }

    Ok(())
}

fn collect(checks: &[(&str, Result<(), String>)]) -> Result<(), Vec<FieldError>> {
    let errors: Vec<FieldError> = checks
        .iter()
        .filter_map(|(field, result)| {
            result
                .as_ref()
                .err()
                .map(|message| FieldError::new(*field, message.clone()))
        })
        .collect();

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Check login credentials before contacting the backend
pub fn validate_credentials(credentials: &LoginCredentials) -> Result<(), Vec<FieldError>> {
    let password = if credentials.password.is_empty() {
        Err("Password is required".to_string())
    } else {
        Ok(())
    };
    collect(&[
        ("email", validate_email(credentials.email.trim())),
        ("password", password),
    ])
}

/// Check a registration before contacting the backend
pub fn validate_sign_up(request: &SignUpRequest) -> Result<(), Vec<FieldError>> {
    collect(&[
        ("email", validate_email(request.email.trim())),
        ("password", validate_password(&request.password)),
        ("full_name", validate_full_name(&request.full_name)),
    ])
}
