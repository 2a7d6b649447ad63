pub const STDERR_SEPARATOR: &str = "\n--- STDERR ---";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Completed { stdout: String, stderr: String },
    TimedOut,
    LaunchFailed { cause: String },
}

/// Collapses the two captured streams into one body. The separator is only
/// appended when the program actually wrote to stderr.
pub fn merged_output(stdout: &str, stderr: &str) -> String {
    if stderr.is_empty() {
        stdout.to_owned()
    } else {
        format!("{stdout}{STDERR_SEPARATOR}{stderr}")
    }
}
