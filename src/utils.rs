use chrono::{DateTime, Utc};

use crate::errors::AppError;

/// Lowercases, maps every non-alphanumeric character to `_` and trims the
/// result, e.g. `"Super Admin!"` -> `"super_admin"`.
pub fn slugify(value: &str) -> Result<String, AppError> {
    let mapped: String = value
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect();

    let slug = mapped.trim_matches('_');
    if slug.is_empty() {
        return Err(AppError::bad_request(format!(
            "'{value}' does not contain any alphanumeric characters"
        )));
    }

    Ok(slug.to_string())
}

/// Validates an entity name and returns it trimmed.
pub fn normalize_name(value: &str) -> Result<String, AppError> {
    let name = value.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    Ok(name.to_string())
}

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_lowercases_and_replaces_separators() {
        assert_eq!(slugify("Super Admin").unwrap(), "super_admin");
        assert_eq!(slugify("  posts.edit-own  ").unwrap(), "posts_edit_own");
        assert_eq!(slugify("!Editor!").unwrap(), "editor");
    }

    #[test]
    fn slugify_rejects_punctuation_only() {
        assert!(matches!(slugify("  --- "), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn normalize_name_rejects_blank() {
        assert!(normalize_name("   ").is_err());
        assert_eq!(normalize_name(" Editor ").unwrap(), "Editor");
    }
}
