//! Action 状态与类型。

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::codes::{CodeMap, DomainError, normalize_name};

/// Action 状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Scheduled,
    Retrieved,
    Download,
    Downloaded,
    Running,
    WaitForConfirmation,
    Canceling,
    Warning,
    Finished,
    Error,
    Canceled,
    CancelRejected,
}

impl ActionStatus {
    pub const ALL: [ActionStatus; 12] = [
        ActionStatus::Scheduled,
        ActionStatus::Retrieved,
        ActionStatus::Download,
        ActionStatus::Downloaded,
        ActionStatus::Running,
        ActionStatus::WaitForConfirmation,
        ActionStatus::Canceling,
        ActionStatus::Warning,
        ActionStatus::Finished,
        ActionStatus::Error,
        ActionStatus::Canceled,
        ActionStatus::CancelRejected,
    ];

    /// 持久化编码。
    pub fn code(self) -> i32 {
        match self {
            ActionStatus::Finished => 0,
            ActionStatus::Error => 1,
            ActionStatus::Warning => 2,
            ActionStatus::Running => 3,
            ActionStatus::Canceled => 4,
            ActionStatus::Canceling => 5,
            ActionStatus::Retrieved => 6,
            ActionStatus::Download => 7,
            ActionStatus::Scheduled => 8,
            ActionStatus::CancelRejected => 9,
            ActionStatus::Downloaded => 10,
            ActionStatus::WaitForConfirmation => 11,
        }
    }

    pub fn code_map() -> Result<&'static CodeMap<ActionStatus>, DomainError> {
        static MAP: OnceLock<Result<CodeMap<ActionStatus>, DomainError>> = OnceLock::new();
        MAP.get_or_init(|| CodeMap::build("action status", &Self::ALL, Self::code))
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn from_code(code: i32) -> Result<Self, DomainError> {
        Self::code_map()?.decode(code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Scheduled => "SCHEDULED",
            ActionStatus::Retrieved => "RETRIEVED",
            ActionStatus::Download => "DOWNLOAD",
            ActionStatus::Downloaded => "DOWNLOADED",
            ActionStatus::Running => "RUNNING",
            ActionStatus::WaitForConfirmation => "WAIT_FOR_CONFIRMATION",
            ActionStatus::Canceling => "CANCELING",
            ActionStatus::Warning => "WARNING",
            ActionStatus::Finished => "FINISHED",
            ActionStatus::Error => "ERROR",
            ActionStatus::Canceled => "CANCELED",
            ActionStatus::CancelRejected => "CANCEL_REJECTED",
        }
    }

    /// 尚未被设备取走（取消可立即生效）。
    pub fn is_undispatched(self) -> bool {
        matches!(
            self,
            ActionStatus::Scheduled | ActionStatus::WaitForConfirmation
        )
    }

    /// 设备侧允许回报的状态（SCHEDULED / CANCELING / WAIT_FOR_CONFIRMATION 仅由管理侧产生）。
    pub fn is_device_reportable(self) -> bool {
        !matches!(
            self,
            ActionStatus::Scheduled | ActionStatus::Canceling | ActionStatus::WaitForConfirmation
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let name = normalize_name(value);
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == name)
            .ok_or(DomainError::UnknownName {
                kind: "action status",
                name: value.to_string(),
            })
    }
}

impl TryFrom<i32> for ActionStatus {
    type Error = DomainError;

    fn try_from(code: i32) -> Result<Self, DomainError> {
        Self::from_code(code)
    }
}

/// Action 类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Forced,
    Soft,
    #[serde(rename = "TIMEFORCED")]
    TimeForced,
    DownloadOnly,
}

impl ActionType {
    pub const ALL: [ActionType; 4] = [
        ActionType::Forced,
        ActionType::Soft,
        ActionType::TimeForced,
        ActionType::DownloadOnly,
    ];

    pub fn code(self) -> i32 {
        match self {
            ActionType::Forced => 0,
            ActionType::Soft => 1,
            ActionType::TimeForced => 2,
            ActionType::DownloadOnly => 3,
        }
    }

    pub fn code_map() -> Result<&'static CodeMap<ActionType>, DomainError> {
        static MAP: OnceLock<Result<CodeMap<ActionType>, DomainError>> = OnceLock::new();
        MAP.get_or_init(|| CodeMap::build("action type", &Self::ALL, Self::code))
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn from_code(code: i32) -> Result<Self, DomainError> {
        Self::code_map()?.decode(code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Forced => "FORCED",
            ActionType::Soft => "SOFT",
            ActionType::TimeForced => "TIMEFORCED",
            ActionType::DownloadOnly => "DOWNLOAD_ONLY",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let name = normalize_name(value);
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == name)
            .ok_or(DomainError::UnknownName {
                kind: "action type",
                name: value.to_string(),
            })
    }
}
