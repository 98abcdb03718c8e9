//! Typed failures raised by the layout pipeline.
//!
//! Everything else travels as `anyhow::Error`; these variants exist so callers
//! can tell the recoverable cases apart with `downcast_ref`.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An annotation describes more than one physical page.
    #[error("annotation declares {0} pages; exactly one page per image is supported")]
    MultiPageNotSupported(usize),

    /// A `title` descriptor did not have the expected arity or was not numeric.
    #[error("malformed '{property}' descriptor in title '{title}': {reason}")]
    Descriptor {
        property: &'static str,
        title: String,
        reason: String,
    },

    /// The monthly OCR quota is used up.
    #[error("OCR quota exceeded: {count}/{max}")]
    QuotaExceeded { count: u64, max: u64 },
}

impl Error {
    pub(crate) fn descriptor(
        property: &'static str,
        title: &str,
        reason: impl Into<String>,
    ) -> Self {
        Error::Descriptor {
            property,
            title: title.to_string(),
            reason: reason.into(),
        }
    }
}
