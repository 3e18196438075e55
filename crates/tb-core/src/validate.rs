//! Input validation shared by the storage plugins.

use crate::config::CoreConfig;
use crate::error::{ErrorKind, Result};
use crate::models::Page;

pub const MAX_USERNAME_LEN: usize = 32;

/// Usernames are immutable identifiers, so keep them URL and log friendly.
pub fn username(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.chars().count() <= MAX_USERNAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(ErrorKind::IllegalName.with_context(format!("username {name:?}")))
    }
}

pub fn password(pass: &str, config: &CoreConfig) -> Result<()> {
    if pass.chars().count() < config.password_min_len {
        return Err(ErrorKind::PasswordTooShort.with_context(format!(
            "at least {} characters required",
            config.password_min_len
        )));
    }
    Ok(())
}

/// Returns the trimmed tag.
pub fn tag<'a>(tag: &'a str, config: &CoreConfig) -> Result<&'a str> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(ErrorKind::EmptyTag.into());
    }
    if tag.chars().count() > config.max_tag_len {
        return Err(ErrorKind::TagTooLong.with_context(format!(
            "at most {} characters allowed",
            config.max_tag_len
        )));
    }
    Ok(tag)
}

pub fn page(page: Page, config: &CoreConfig) -> Result<()> {
    if page.count == 0 || page.count > config.max_page_count {
        return Err(ErrorKind::PageCountLimit.with_context(format!(
            "count {} not in 1..={}",
            page.count, config.max_page_count
        )));
    }
    Ok(())
}
