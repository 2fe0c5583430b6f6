//! Correlation rows

use serde::{Deserialize, Serialize};

/// (account, native id) of the message a fan-out started from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OriginRef {
    pub account: String,
    pub id: String,
}

impl OriginRef {
    pub fn new(account: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            id: id.into(),
        }
    }
}

/// One destination copy produced by a fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationRow {
    pub dest_account: String,
    pub dest_id: String,
    pub dest_channel: String,
}
