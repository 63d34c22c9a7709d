//! Target 派生更新状态。

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::codes::{CodeMap, DomainError, normalize_name};

/// Target 更新状态（由 Action 历史派生）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetUpdateStatus {
    Unknown,
    Registered,
    Pending,
    InSync,
    Error,
}

impl TargetUpdateStatus {
    pub const ALL: [TargetUpdateStatus; 5] = [
        TargetUpdateStatus::Unknown,
        TargetUpdateStatus::Registered,
        TargetUpdateStatus::Pending,
        TargetUpdateStatus::InSync,
        TargetUpdateStatus::Error,
    ];

    pub fn code(self) -> i32 {
        match self {
            TargetUpdateStatus::Unknown => 0,
            TargetUpdateStatus::InSync => 1,
            TargetUpdateStatus::Pending => 2,
            TargetUpdateStatus::Error => 3,
            TargetUpdateStatus::Registered => 4,
        }
    }

    pub fn code_map() -> Result<&'static CodeMap<TargetUpdateStatus>, DomainError> {
        static MAP: OnceLock<Result<CodeMap<TargetUpdateStatus>, DomainError>> = OnceLock::new();
        MAP.get_or_init(|| CodeMap::build("target update status", &Self::ALL, Self::code))
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn from_code(code: i32) -> Result<Self, DomainError> {
        Self::code_map()?.decode(code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetUpdateStatus::Unknown => "UNKNOWN",
            TargetUpdateStatus::Registered => "REGISTERED",
            TargetUpdateStatus::Pending => "PENDING",
            TargetUpdateStatus::InSync => "IN_SYNC",
            TargetUpdateStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for TargetUpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetUpdateStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let name = normalize_name(value);
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == name)
            .ok_or(DomainError::UnknownName {
                kind: "target update status",
                name: value.to_string(),
            })
    }
}
