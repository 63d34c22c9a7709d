//! 部署引擎运行配置加载。

use std::env;
use std::fmt;
use std::str::FromStr;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 新分配取代旧 Action 的方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupersedeMode {
    /// 旧 Action 立即 CANCELED，不等待设备确认。
    #[default]
    Immediate,
    /// 已下发的旧 Action 进入 CANCELING，等待设备确认。
    Graceful,
}

impl FromStr for SupersedeMode {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(SupersedeMode::Immediate),
            "graceful" => Ok(SupersedeMode::Graceful),
            _ => Err(()),
        }
    }
}

impl fmt::Display for SupersedeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupersedeMode::Immediate => f.write_str("immediate"),
            SupersedeMode::Graceful => f.write_str("graceful"),
        }
    }
}

/// 部署引擎运行配置。
#[derive(Debug, Clone)]
pub struct DeploymentSettings {
    /// 未配置时使用内存存储。
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// 单个子事务 / IN 子句允许的最大 Target 数。
    pub max_entries_in_statement: usize,
    /// 每个 Target 允许的 Action 总数上限（0 表示不限制）。
    pub max_actions_per_target: u64,
    pub supersede_mode: SupersedeMode,
    pub weight_required: bool,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 8,
            max_entries_in_statement: 999,
            max_actions_per_target: 400,
            supersede_mode: SupersedeMode::Immediate,
            weight_required: false,
        }
    }
}

impl DeploymentSettings {
    /// 加载本地 .env（如存在）后读取环境变量。
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let database_url = read_optional("FOTA_DATABASE_URL");
        let db_max_connections =
            read_with_default("FOTA_DB_MAX_CONNECTIONS", defaults.db_max_connections)?;
        let max_entries_in_statement = read_with_default(
            "FOTA_MAX_ENTRIES_IN_STATEMENT",
            defaults.max_entries_in_statement,
        )?;
        if max_entries_in_statement == 0 {
            return Err(ConfigError::Invalid(
                "FOTA_MAX_ENTRIES_IN_STATEMENT".to_string(),
                "0".to_string(),
            ));
        }
        let max_actions_per_target = read_with_default(
            "FOTA_MAX_ACTIONS_PER_TARGET",
            defaults.max_actions_per_target,
        )?;
        let supersede_mode = read_with_default("FOTA_SUPERSEDE_MODE", defaults.supersede_mode)?;
        let weight_required = read_bool_with_default("FOTA_WEIGHT_REQUIRED", false);

        Ok(Self {
            database_url,
            db_max_connections,
            max_entries_in_statement,
            max_actions_per_target,
            supersede_mode,
            weight_required,
        })
    }
}

fn read_with_default<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    let value = match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => return Ok(default),
    };
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
