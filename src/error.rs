//! Error taxonomy for the governor.
//!
//! Each collaborator gets its own error type; [`GovernorError`] rolls them up
//! and classifies them so the control loop can tell a fatal startup problem
//! from a recoverable artifact problem or a one-cycle hiccup.

use std::io;
use std::path::PathBuf;

/// How the control loop must react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Abort the process with a non-zero exit code.
    Fatal,
    /// Log and fall back to a safe default, then continue.
    Recoverable,
    /// Log, skip this cycle, back off and retry.
    Transient,
}

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("no temperature source found under {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unparseable temperature value {0:?}")]
    Parse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("no cpufreq policies found under {0}")]
    NoPolicies(PathBuf),
    #[error("gear catalog is empty")]
    EmptyCatalog,
    #[error("gear {0} is not in the catalog")]
    UnknownGear(u8),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("actuator rejected gear {level}: {reason}")]
    Rejected { level: u8, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy file {0} does not exist")]
    Missing(PathBuf),
    #[error("failed to access policy file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("policy file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("policy row for state {state} has {found} actions, expected {expected}")]
    Shape {
        state: f64,
        found: usize,
        expected: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read model artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("model artifact is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("model lists {features} features but {coefficients} coefficients")]
    CoefficientShape { features: usize, coefficients: usize },
    #[error("model feature {0:?} is not recognized")]
    UnknownFeature(String),
    #[error("feature {0:?} is not available this cycle")]
    MissingFeature(&'static str),
    #[error("model expects {expected} features, got {found}")]
    FeatureShape { expected: usize, found: usize },
    #[error("model produced a non-finite value")]
    NonFinite,
}

#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("temperature source unavailable: {0}")]
    SourceUnavailable(#[source] SensorError),
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error(transparent)]
    Actuator(#[from] ActuatorError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl GovernorError {
    pub fn severity(&self) -> Severity {
        match self {
            GovernorError::Config(_) | GovernorError::SourceUnavailable(_) => Severity::Fatal,
            GovernorError::Actuator(ActuatorError::NoPolicies(_))
            | GovernorError::Actuator(ActuatorError::EmptyCatalog) => Severity::Fatal,
            GovernorError::Policy(_) | GovernorError::Model(_) => Severity::Recoverable,
            GovernorError::Sensor(_) | GovernorError::Actuator(_) => Severity::Transient,
        }
    }
}

pub type Result<T> = std::result::Result<T, GovernorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classification() {
        let fatal = GovernorError::Actuator(ActuatorError::EmptyCatalog);
        assert_eq!(fatal.severity(), Severity::Fatal);

        let transient = GovernorError::Sensor(SensorError::Parse("abc".to_string()));
        assert_eq!(transient.severity(), Severity::Transient);

        let recoverable = GovernorError::Policy(PolicyError::Missing(PathBuf::from("q.json")));
        assert_eq!(recoverable.severity(), Severity::Recoverable);

        let rejected = GovernorError::Actuator(ActuatorError::Rejected {
            level: 2,
            reason: "busy".to_string(),
        });
        assert_eq!(rejected.severity(), Severity::Transient);
    }
}
