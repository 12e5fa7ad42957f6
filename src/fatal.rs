//! Top-level fatal error reporting.
//!
//! The only place in the crate allowed to end the process. Callers hand over
//! an error that cannot be recovered from (an unusable environment, a failed
//! asynchronous build step); it is logged as a structured event and the
//! process exits with [`exit_code`].

use crate::error::Error;
use tracing::error;

/// Process exit code for an error: 2 for configuration errors, 1 otherwise.
pub fn exit_code(err: &Error) -> i32 {
    match err {
        Error::Configuration(_) => 2,
        _ => 1,
    }
}

/// Names the operation an error came from, for the diagnostic.
pub fn operation(err: &Error) -> &str {
    match err {
        Error::StepFailed { step, .. } | Error::AsyncStepFailed { step, .. } => step,
        Error::Configuration(_) => "configuration",
        Error::RuntimeUnavailable { .. } => "runtime",
        Error::BuildFailed { .. } | Error::ImagePullFailed { .. } => "image",
        _ => "container",
    }
}

/// Logs the error and terminates the process.
pub fn terminate(err: &Error) -> ! {
    error!(
        operation = operation(err),
        error = %err,
        exit_code = exit_code(err),
        "fatal error, terminating"
    );
    std::process::exit(exit_code(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_exit_with_two() {
        assert_eq!(exit_code(&Error::Configuration("bad".into())), 2);
        assert_eq!(exit_code(&Error::ContainerNotFound("x".into())), 1);
        let async_failure = Error::AsyncStepFailed {
            step: "lint".into(),
            reason: "boom".into(),
        };
        assert_eq!(exit_code(&async_failure), 1);
        assert_eq!(operation(&async_failure), "lint");
    }
}
