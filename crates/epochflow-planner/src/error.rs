use thiserror::Error;

use epochflow_exec::ExecError;
use epochflow_operators::OpError;

pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid pipeline: {0}")]
    Invalid(String),

    #[error("step {step}: {source}")]
    Kernel {
        step: usize,
        #[source]
        source: OpError,
    },

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Core(#[from] epochflow_core::Error),
}
