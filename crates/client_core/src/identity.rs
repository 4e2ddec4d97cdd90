use std::{fs, path::Path};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use shared::domain::UserId;

/// The signed-in user record left behind by the login flow.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredUser {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(rename = "firstName", default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Reads the current identity once at startup.
pub fn load_identity(path: &Path) -> Result<StoredUser> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read stored user from {}", path.display()))?;
    let user: StoredUser = serde_json::from_str(&raw)
        .with_context(|| format!("invalid stored user record in {}", path.display()))?;
    if user.id.as_str().trim().is_empty() {
        return Err(anyhow!(
            "stored user record in {} has an empty _id",
            path.display()
        ));
    }
    Ok(user)
}
