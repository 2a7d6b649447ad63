pub mod executor;
pub mod result;

pub use executor::{ExecutionRequest, Executor};
pub use result::{ExecutionResult, STDERR_SEPARATOR, merged_output};

use std::time::Duration;

pub const DEFAULT_INTERPRETER: &str = "python3";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub interpreter: String,
    pub default_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            interpreter: DEFAULT_INTERPRETER.to_owned(),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}
