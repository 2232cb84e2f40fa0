use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier as sent by the backend. Some endpoints emit numbers, others
/// emit strings for the same kind of key, so both are accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Number(i64),
    Text(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Number(value) => write!(f, "{value}"),
            EntityId::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        EntityId::Number(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId::Text(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        EntityId::Text(value)
    }
}

/// Which profile a signed-in identity is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BindType {
    /// Student account.
    #[default]
    #[serde(rename = "0")]
    Member,
    /// Institution account, additionally bound to a store.
    #[serde(rename = "1")]
    Seller,
}

impl BindType {
    pub fn code(self) -> &'static str {
        match self {
            BindType::Member => "0",
            BindType::Seller => "1",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "0" => Some(BindType::Member),
            "1" => Some(BindType::Seller),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BindType::Member => "Student",
            BindType::Seller => "Teacher",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub id: EntityId,
    #[serde(default, deserialize_with = "crate::protocol::null_as_default")]
    pub name: String,
}
