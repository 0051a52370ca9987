use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Claim name some identity providers use instead of `sub`
const NAME_ID_CLAIM: &str = "nameid";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (recipient ID)
    #[serde(default)]
    pub sub: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
    /// Additional custom claims
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Claims {
    /// Resolve the recipient identity carried by the token.
    ///
    /// Returns `None` when neither `sub` nor `nameid` holds a UUID.
    pub fn recipient_id(&self) -> Option<Uuid> {
        let raw = self.sub.as_deref().or_else(|| {
            self.extra
                .get(NAME_ID_CLAIM)
                .and_then(|value| value.as_str())
        })?;
        Uuid::parse_str(raw.trim()).ok()
    }

    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.exp < now
    }
}
