use std::{borrow::Cow, error::Error, sync::Arc};

/// Errors surfaced by streams, controllers and readers.
///
/// Once a stream has errored, the same `StreamError` value is handed to every
/// current and future read; producer errors carried in [`StreamError::Source`]
/// compare by pointer identity so waiters can observe "the same error object".
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    /// Usage errors: operating on a stream in a state that does not permit it,
    /// invalid chunks, double-close, locked or released readers.
    #[error("TypeError: {0}")]
    Type(Cow<'static, str>),

    /// Numeric contract violations, e.g. responding with more bytes than the
    /// outstanding BYOB request has room for.
    #[error("RangeError: {0}")]
    Range(Cow<'static, str>),

    /// A failure reported by the underlying source (`start`/`pull` rejection).
    #[error(transparent)]
    Source(Arc<dyn Error + Send + Sync>),

    /// An arbitrary reason passed to `controller.error()`.
    #[error("{0}")]
    Custom(Arc<str>),
}

impl StreamError {
    pub(crate) fn r#type(msg: &'static str) -> Self {
        Self::Type(Cow::Borrowed(msg))
    }

    pub(crate) fn range(msg: &'static str) -> Self {
        Self::Range(Cow::Borrowed(msg))
    }

    /// Wrap a producer-side error.
    pub fn source(err: impl Error + Send + Sync + 'static) -> Self {
        Self::Source(Arc::new(err))
    }
}

impl From<&str> for StreamError {
    fn from(msg: &str) -> Self {
        Self::Custom(Arc::from(msg))
    }
}

impl From<String> for StreamError {
    fn from(msg: String) -> Self {
        Self::Custom(Arc::from(msg))
    }
}

impl PartialEq for StreamError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Type(a), Self::Type(b)) => a == b,
            (Self::Range(a), Self::Range(b)) => a == b,
            // The stored error is sticky and shared; identity is what callers
            // can rely on, not message equality.
            (Self::Source(a), Self::Source(b)) => Arc::ptr_eq(a, b),
            (Self::Custom(a), Self::Custom(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for StreamError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn source_errors_compare_by_identity() {
        let e = StreamError::source(Boom);
        let same = e.clone();
        let other = StreamError::source(Boom);

        assert_eq!(e, same);
        assert_ne!(e, other);
    }

    #[test]
    fn custom_errors_compare_by_message() {
        assert_eq!(StreamError::from("x"), StreamError::from("x"));
        assert_ne!(StreamError::from("x"), StreamError::r#type("x"));
    }
}
