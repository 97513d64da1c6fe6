use std::sync::Arc;

pub type ForgeResult<T> = Result<T, ForgeError>;

#[derive(thiserror::Error, Debug)]
pub enum ForgeError {
    #[error("input error: {0}")]
    Input(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A failure produced by one generation and delivered to every caller
    /// that was deduplicated onto it.
    #[error("{0}")]
    Shared(Arc<ForgeError>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ForgeError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(ForgeError::input("x").to_string().contains("input error:"));
        assert!(
            ForgeError::decode("x")
                .to_string()
                .contains("decode error:")
        );
        assert!(
            ForgeError::encode("x")
                .to_string()
                .contains("encode error:")
        );
    }

    #[test]
    fn io_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = ForgeError::Io(base);
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn shared_displays_the_original_failure() {
        let err = ForgeError::Shared(Arc::new(ForgeError::input("bad overlay")));
        assert!(err.to_string().contains("bad overlay"));
    }
}
