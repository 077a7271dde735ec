/// The single error type for all fallible tannoy operations.
///
/// The bus's core surface is deliberately infallible: posting with no
/// subscribers, removing a stale token, or dropping a stream mid-iteration
/// all degrade to no-ops. What remains fallible returns
/// `tannoy::Result<T>` (alias for `Result<T, tannoy::Error>`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("message bus already shut down")]
    BusClosed,

    #[cfg(feature = "test-harness")]
    #[error("settle condition not met within {0:?}: {1} messages recorded")]
    SettleTimeout(std::time::Duration, usize),
}
