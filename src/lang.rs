//! Script compilation into executable query specifications.
//!
//! The real compiler lives in the query language library; this module owns
//! the seam the executor drives: a script plus the run's logical "now"
//! become a [`Spec`] the query service can evaluate.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A compiled query specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spec {
    source: String,
    now: DateTime<Utc>,
}

impl Spec {
    /// The script this specification was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The logical wall-clock the script was compiled against.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Canonical JSON rendering, stable across identical compilations.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).expect("spec serialization cannot fail")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("script is empty")]
    EmptyScript,
    #[error("timestamp {0} is out of range")]
    TimestampOutOfRange(i64),
}

/// Compile a script against the run's logical wall-clock, in seconds.
pub fn compile(script: &str, now: i64) -> Result<Spec, CompileError> {
    if script.trim().is_empty() {
        return Err(CompileError::EmptyScript);
    }
    let now = Utc
        .timestamp_opt(now, 0)
        .single()
        .ok_or(CompileError::TimestampOutOfRange(now))?;
    Ok(Spec {
        source: script.to_string(),
        now,
    })
}

#[cfg(test)]
mod tests {
    use super::{CompileError, compile};

    #[test]
    fn compiles_script_with_now() {
        let spec = compile("from(bucket: \"one\")", 123).unwrap();
        assert_eq!(spec.source(), "from(bucket: \"one\")");
        assert_eq!(spec.now().timestamp(), 123);
    }

    #[test]
    fn rejects_blank_scripts() {
        assert_eq!(compile("", 123), Err(CompileError::EmptyScript));
        assert_eq!(compile("  \n\t", 123), Err(CompileError::EmptyScript));
    }

    #[test]
    fn rejects_unrepresentable_timestamps() {
        assert_eq!(
            compile("from(bucket: \"one\")", i64::MAX),
            Err(CompileError::TimestampOutOfRange(i64::MAX))
        );
    }

    #[test]
    fn fingerprint_is_stable_and_distinguishes_now() {
        let a = compile("from(bucket: \"one\")", 123).unwrap();
        let b = compile("from(bucket: \"one\")", 123).unwrap();
        let c = compile("from(bucket: \"one\")", 124).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
