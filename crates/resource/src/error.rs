//! 生命周期错误

use std::fmt;
use std::time::Duration;

use keel_common::BoxError;
use thiserror::Error;

use crate::manager::LifecycleState;

/// 资源管理错误
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to init resource {resource}: {source}")]
    Init { resource: String, source: BoxError },

    #[error("failed to start resource {resource}: {source}")]
    Start { resource: String, source: BoxError },

    #[error("failed to stop {} resource(s): {}", .failures.len(), join_failures(.failures))]
    Stop { failures: Vec<StopFailure> },

    #[error("resource {resource} is unhealthy: {source}")]
    Unhealthy { resource: String, source: BoxError },

    #[error("stop did not finish within {0:?}")]
    StopTimeout(Duration),

    #[error("resources cannot be added once the manager has started")]
    AlreadyStarted,

    #[error("cannot {action} while the manager is {state}")]
    InvalidState {
        action: &'static str,
        state: LifecycleState,
    },
}

impl ResourceError {
    /// 出错的资源名称
    pub fn resource(&self) -> Option<&str> {
        match self {
            Self::Init { resource, .. }
            | Self::Start { resource, .. }
            | Self::Unhealthy { resource, .. } => Some(resource),
            _ => None,
        }
    }
}

/// 单个资源的停止失败
#[derive(Debug)]
pub struct StopFailure {
    pub resource: String,
    pub error: BoxError,
}

impl fmt::Display for StopFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.resource, self.error)
    }
}

fn join_failures(failures: &[StopFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// 后台任务管理错误
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("tasks did not drain within {timeout:?}, {pending} still running")]
    DrainTimeout { timeout: Duration, pending: usize },
}
