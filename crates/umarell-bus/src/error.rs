//! Error types for umarell-bus

/// Event bus errors.
///
/// Every variant describes a caller bug (an invalid identifier), never a
/// transient condition, so there is nothing to retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("channel name must not be empty")]
    EmptyChannelName,

    #[error("property key must not be empty")]
    EmptyPropertyKey,

    #[error("at least one property key is required")]
    NoPropertyKeys,
}
