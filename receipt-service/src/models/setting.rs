//! Settings model.

use serde::{Deserialize, Serialize};

/// Key/value entry from the settings collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Setting {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Setting {
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            value: Some(value.into()),
            active: true,
        }
    }
}
