use thiserror::Error;

/// Intervalometer error types covering configuration and scheduling faults.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IvmError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Trigger interval was zero or negative.
    #[error("interval must be positive, got {micros}us")]
    InvalidInterval {
        /// The rejected interval in microseconds.
        micros: i64,
    },

    /// The system clock could not be read at startup.
    ///
    /// A functioning clock is a process-startup precondition; this error is
    /// fatal and never retried.
    #[error("clock unavailable: {0}")]
    ClockUnavailable(String),

    /// Invalid trigger lifecycle transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

/// Convenience type alias for intervalometer operations.
pub type IvmResult<T> = Result<T, IvmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IvmError::InvalidInterval { micros: 0 };
        assert_eq!(err.to_string(), "interval must be positive, got 0us");

        let err = IvmError::InvalidStateTransition {
            from: "ARMED".into(),
            to: "ARMED".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid state transition from ARMED to ARMED"
        );
    }
}
