//! 按配置装配部署引擎。
//!
//! 配置了 `FOTA_DATABASE_URL` 时使用 PostgreSQL（启动时建表），否则使用内存仓储。

use std::sync::Arc;

use domain::validate_code_maps;
use fota_config::DeploymentSettings;
use fota_storage::{DeploymentRepository, InMemoryRepository, PgRepository, connect_pool};
use fota_telemetry::init_tracing;
use tracing::info;

use crate::controller::ControllerManagement;
use crate::events::{EventSink, TracingEventSink};
use crate::management::DeploymentManagement;
use crate::{DeploymentConfig, DeploymentError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryBackend {
    InMemory,
    Postgres,
}

/// 装配好的部署引擎。
#[derive(Clone)]
pub struct DeploymentRuntime {
    pub settings: DeploymentSettings,
    pub backend: RepositoryBackend,
    pub repository: Arc<dyn DeploymentRepository>,
    pub events: Arc<dyn EventSink>,
    pub management: DeploymentManagement,
    pub controller: ControllerManagement,
}

impl DeploymentRuntime {
    /// 读取环境变量（含 .env）并初始化日志，事件输出到 tracing。
    pub async fn from_env() -> Result<Self, DeploymentError> {
        init_tracing();
        let settings = DeploymentSettings::load()
            .map_err(|err| DeploymentError::Configuration(err.to_string()))?;
        Self::build(settings, Arc::new(TracingEventSink)).await
    }

    pub async fn build(
        settings: DeploymentSettings,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, DeploymentError> {
        validate_code_maps()?;
        let (backend, repository) = match settings.database_url.as_deref() {
            Some(database_url) => {
                let pool = connect_pool(database_url, settings.db_max_connections).await?;
                let postgres = PgRepository::new(pool);
                postgres.migrate().await?;
                let repository: Arc<dyn DeploymentRepository> = Arc::new(postgres);
                (RepositoryBackend::Postgres, repository)
            }
            None => {
                let repository: Arc<dyn DeploymentRepository> = Arc::new(InMemoryRepository::new());
                (RepositoryBackend::InMemory, repository)
            }
        };
        let runtime = Self::assemble(settings, backend, repository, events);
        info!(
            target: "fota.deployment",
            backend = ?runtime.backend,
            supersede_mode = %runtime.settings.supersede_mode,
            max_entries_in_statement = runtime.settings.max_entries_in_statement,
            max_actions_per_target = runtime.settings.max_actions_per_target,
            "deployment_runtime_ready"
        );
        Ok(runtime)
    }

    /// 内存仓储（测试、无数据库部署）。
    pub fn in_memory(settings: DeploymentSettings, events: Arc<dyn EventSink>) -> Self {
        Self::assemble(
            settings,
            RepositoryBackend::InMemory,
            Arc::new(InMemoryRepository::new()),
            events,
        )
    }

    fn assemble(
        settings: DeploymentSettings,
        backend: RepositoryBackend,
        repository: Arc<dyn DeploymentRepository>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let config = DeploymentConfig::from(&settings);
        let management =
            DeploymentManagement::new_with_config(repository.clone(), events.clone(), config);
        let controller = ControllerManagement::new(repository.clone(), events.clone());
        Self {
            settings,
            backend,
            repository,
            events,
            management,
            controller,
        }
    }
}
