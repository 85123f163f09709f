use validator::ValidationError;

pub const MAX_POST_LEN: usize = 5000;
pub const MAX_COMMENT_LEN: usize = 2000;
const MAX_DISPLAY_NAME_LEN: usize = 100;

/// Post text may be empty when media is attached afterwards.
pub fn validate_post_content(value: &str) -> Result<(), ValidationError> {
    if value.trim().chars().count() > MAX_POST_LEN {
        return Err(ValidationError::new("post_content_length"));
    }
    Ok(())
}

pub fn validate_comment_content(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_COMMENT_LEN {
        return Err(ValidationError::new("comment_content_length"));
    }
    Ok(())
}

pub fn validate_display_name(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(ValidationError::new("display_name_length"));
    }
    Ok(())
}

pub fn validate_photo_url(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("photo_url_empty"));
    }
    if trimmed.len() > 1024 {
        return Err(ValidationError::new("photo_url_length"));
    }
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(ValidationError::new("photo_url_scheme"));
    }
    Ok(())
}

pub fn validate_emoji(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > 32 {
        return Err(ValidationError::new("emoji_length"));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(ValidationError::new("emoji_whitespace"));
    }
    Ok(())
}

pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn display_name_or_default(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("Anonymous")
        .to_string()
}
