use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceKind {
    Call,
    State,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: EvidenceKind,
    pub value: String,
}

impl Evidence {
    pub fn call(value: impl Into<String>) -> Self {
        Self {
            kind: EvidenceKind::Call,
            value: value.into(),
        }
    }

    pub fn state(value: impl Into<String>) -> Self {
        Self {
            kind: EvidenceKind::State,
            value: value.into(),
        }
    }
}
