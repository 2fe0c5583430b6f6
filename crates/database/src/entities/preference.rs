//! Per-user relay preferences

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferenceRecord {
    pub user_id: String,
    pub opt_out: bool,
    pub opt_out_media: bool,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub updated_at: String,
}

impl UserPreferenceRecord {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            updated_at: chrono::Utc::now().to_rfc3339(),
            ..Default::default()
        }
    }

    /// Nothing set; the row can be removed.
    pub fn is_default(&self) -> bool {
        !self.opt_out
            && !self.opt_out_media
            && self.display_name.is_none()
            && self.avatar_url.is_none()
    }
}
