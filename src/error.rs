//! Error types.
//!
//! Two errors cross the crate boundary:
//!
//! - [`ConfigError`]: an invalid builder configuration, returned by
//!   [`CacheBuilder::try_build`](crate::CacheBuilder::try_build).
//! - [`LoadError`]: a failed load, returned by
//!   [`Cache::try_get_with`](crate::Cache::try_get_with) and
//!   [`Cache::get_all`](crate::Cache::get_all).  The original cause is
//!   shared behind an `Arc` so that every caller in a single-flight cohort
//!   receives the same error.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Boxed error type accepted from user loaders.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when cache configuration parameters are invalid.
///
/// # Example
/// ```
/// use cortado::CacheBuilder;
/// use std::time::Duration;
///
/// // refresh_after_write requires a loader.
/// let err = CacheBuilder::<u64, u64>::new(10)
///     .refresh_after_write(Duration::from_secs(1))
///     .try_build()
///     .unwrap_err();
/// assert!(err.to_string().contains("loader"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(String);

impl ConfigError {
    pub(crate) fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for ConfigError {}

// ---------------------------------------------------------------------------
// LoadError
// ---------------------------------------------------------------------------

/// A load that failed.
///
/// Cloneable: when several threads wait on the same in-flight load, each of
/// them receives a clone carrying the same shared cause.
#[derive(Clone)]
pub struct LoadError {
    cause: Arc<dyn Error + Send + Sync>,
}

impl LoadError {
    pub(crate) fn new(cause: BoxError) -> Self {
        LoadError {
            cause: Arc::from(cause),
        }
    }

    /// Returns the underlying cause.
    pub fn cause(&self) -> &(dyn Error + Send + Sync) {
        self.cause.as_ref()
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache load failed: {}", self.cause)
    }
}

impl fmt::Debug for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LoadError").field(&self.cause).finish()
    }
}

impl Error for LoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        let cause: &(dyn Error + 'static) = self.cause.as_ref();
        Some(cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn config_error_displays_message() {
        let err = ConfigError::new("num_shards must be a power of two");
        assert_eq!(err.to_string(), "num_shards must be a power of two");
        assert_eq!(err.message(), "num_shards must be a power of two");
    }

    #[test]
    fn load_error_preserves_cause() {
        let cause: BoxError = Box::new(io::Error::new(io::ErrorKind::Other, "backend down"));
        let err = LoadError::new(cause);
        assert!(err.to_string().contains("backend down"));
        assert!(err.source().is_some());
    }

    #[test]
    fn load_error_clones_share_cause() {
        let cause: BoxError = Box::new(io::Error::new(io::ErrorKind::Other, "x"));
        let a = LoadError::new(cause);
        let b = a.clone();
        assert_eq!(a.to_string(), b.to_string());
    }
}
