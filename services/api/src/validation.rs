//! Input validation for resources, reviews and profiles
//!
//! Every check runs before the backend is contacted.

use reqwest::Url;

use common::{FieldError, GatewayError, GatewayResult};

use crate::models::{NewResource, NewReview, ProfileUpdate, ResourceUpdate};

fn length_between(value: &str, label: &str, min: usize, max: usize) -> Result<(), String> {
    let length = value.trim().chars().count();
    if length < min {
        return Err(format!("{} must be at least {} characters long", label, min));
    }
    if length > max {
        return Err(format!("{} must be at most {} characters long", label, max));
    }
    Ok(())
}

/// Validate resource title
pub fn validate_title(title: &str) -> Result<(), String> {
    length_between(title, "Title", 3, 100)
}

/// Validate resource description
pub fn validate_description(description: &str) -> Result<(), String> {
    length_between(description, "Description", 10, 500)
}

/// Validate resource URL; only http and https are accepted
pub fn validate_url(url: &str) -> Result<(), String> {
    let parsed = Url::parse(url.trim()).map_err(|_| "Please enter a valid URL".to_string())?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        _ => Err("URL must use http or https".to_string()),
    }
}

/// Validate review rating
pub fn validate_rating(rating: u8) -> Result<(), String> {
    if !(1..=5).contains(&rating) {
        return Err("Rating must be between 1 and 5".to_string());
    }
    Ok(())
}

/// Validate review comment
pub fn validate_comment(comment: &str) -> Result<(), String> {
    length_between(comment, "Comment", 10, 500)
}

/// Validate profile name
pub fn validate_full_name(full_name: &str) -> Result<(), String> {
    length_between(full_name, "Full name", 0, 100)
}

/// Validate profile bio
pub fn validate_bio(bio: &str) -> Result<(), String> {
    length_between(bio, "Bio", 0, 500)
}

fn collect(checks: Vec<(&str, Result<(), String>)>) -> GatewayResult<()> {
    let errors: Vec<FieldError> = checks
        .into_iter()
        .filter_map(|(field, result)| result.err().map(|message| FieldError::new(field, message)))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::Validation(errors))
    }
}

pub fn validate_new_resource(resource: &NewResource) -> GatewayResult<()> {
    collect(vec![
        ("title", validate_title(&resource.title)),
        ("description", validate_description(&resource.description)),
        ("url", validate_url(&resource.url)),
    ])
}

pub fn validate_resource_update(update: &ResourceUpdate) -> GatewayResult<()> {
    let mut checks = Vec::new();
    if let Some(title) = &update.title {
        checks.push(("title", validate_title(title)));
    }
    if let Some(description) = &update.description {
        checks.push(("description", validate_description(description)));
    }
    if let Some(url) = &update.url {
        checks.push(("url", validate_url(url)));
    }
    if update.is_empty() {
        checks.push(("update", Err("Nothing to update".to_string())));
    }
    collect(checks)
}

pub fn validate_new_review(review: &NewReview) -> GatewayResult<()> {
    collect(vec![
        ("rating", validate_rating(review.rating)),
        ("comment", validate_comment(&review.comment)),
    ])
}

pub fn validate_profile_update(update: &ProfileUpdate) -> GatewayResult<()> {
    let mut checks = Vec::new();
    if let Some(full_name) = &update.full_name {
        checks.push(("full_name", validate_full_name(full_name)));
    }
    if let Some(bio) = &update.bio {
        checks.push(("bio", validate_bio(bio)));
    }
    if update.is_empty() {
        checks.push(("update", Err("Nothing to update".to_string())));
    }
    collect(checks)
}
