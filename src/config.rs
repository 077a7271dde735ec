/// Construction-time configuration for a bus instance.
///
/// Use the builder pattern to customize, or [`Default`] for the defaults:
///
/// ```rust
/// use tannoy::Config;
///
/// let config = Config::default().with_stream_warn_depth(4096);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Backlog depth at which a stream subscription is reported as falling
    /// behind. Stream buffering itself is unbounded; crossing this
    /// threshold produces a single `warn!` per subscription.
    /// Default: 1024
    stream_warn_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            stream_warn_depth: 1024,
        }
    }
}

impl Config {
    /// Set the backlog depth that triggers the slow-consumer warning.
    pub fn with_stream_warn_depth(mut self, depth: usize) -> Self {
        self.stream_warn_depth = depth;
        self
    }

    /// Returns the backlog depth that triggers the slow-consumer warning.
    pub fn stream_warn_depth(&self) -> usize {
        self.stream_warn_depth
    }
}
