//! Engine configuration.

use std::time::Duration;

/// Configuration for a retained size computation.
///
/// # Examples
///
/// ```
/// use retained_size::SizesConfig;
/// use std::time::Duration;
///
/// let config = SizesConfig::default();
/// assert_eq!(config.timeout, Duration::from_secs(30));
/// assert!(config.suspend_threads);
///
/// let quick = SizesConfig::with_timeout_millis(250);
/// assert_eq!(quick.timeout, Duration::from_millis(250));
/// ```
#[derive(Debug, Clone)]
pub struct SizesConfig {
    /// Upper bound on the whole operation. Zero means already expired.
    pub timeout: Duration,
    /// Suspend every other thread for the duration of the operation. Turn
    /// off only when the caller already holds the world stopped.
    pub suspend_threads: bool,
}

impl Default for SizesConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            suspend_threads: true,
        }
    }
}

impl SizesConfig {
    pub fn with_timeout_millis(timeout_millis: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_millis),
            ..Self::default()
        }
    }
}
