use crate::{KeywardError, Result};
use serde::{Deserialize, Serialize};

pub const USER_KEY_PREFIX: &str = "user:";
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Coalescing key shared by every listing request.
pub const LIST_USERS_KEY: &str = "users";

pub const MAX_USERNAME_BYTES: usize = 256;

/// Trims and checks a username, returning the form used for key derivation.
pub fn normalize_username(raw: &str) -> Result<String> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(KeywardError::InvalidRequest(
            "username cannot be empty".to_string(),
        ));
    }

    if username.len() > MAX_USERNAME_BYTES {
        return Err(KeywardError::InvalidRequest(format!(
            "username exceeds {} bytes",
            MAX_USERNAME_BYTES
        )));
    }

    if username.chars().any(char::is_control) {
        return Err(KeywardError::InvalidRequest(
            "username contains control characters".to_string(),
        ));
    }

    Ok(username.to_string())
}

pub fn user_key(username: &str) -> String {
    format!("{}{}", USER_KEY_PREFIX, username)
}

/// Which lock a mutation takes on its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockScope {
    /// One lock per key: create, update and delete exclude each other.
    #[default]
    Key,
    /// One lock per operation kind and key: only same-kind mutations
    /// exclude each other.
    Operation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Create,
    Update,
    Delete,
}

impl Mutation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mutation::Create => "create",
            Mutation::Update => "update",
            Mutation::Delete => "delete",
        }
    }
}

pub fn lock_name(scope: LockScope, mutation: Mutation, key: &str) -> String {
    match scope {
        LockScope::Key => format!("{}{}", LOCK_KEY_PREFIX, key),
        LockScope::Operation => format!("{}{}:{}", LOCK_KEY_PREFIX, mutation.as_str(), key),
    }
}
