/// Result alias that carries the custom [`SoundframeError`] type.
pub type Result<T> = std::result::Result<T, SoundframeError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum SoundframeError {
    /// Free-form message for failures that have no dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// A caller handed in parameters the operation cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// The FFT backend rejected a buffer.
    #[error("fft failed: {0}")]
    Fft(#[from] realfft::FftError),
    /// Audio could not be decoded, or uses a layout we do not support.
    #[error("decode failed: {0}")]
    Decode(String),
    /// Encoder configuration or per-frame encoding failed.
    #[error("encoder error: {0}")]
    Encoder(String),
    /// The muxer rejected the encoded streams.
    #[error("mux error: {0}")]
    Mux(String),
    /// An export command was issued from the wrong state.
    #[error("expected export state {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    /// Export was started without a renderer attached.
    #[error("no renderer attached to the export pipeline")]
    RendererMissing,
    /// A long running computation observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,
    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl SoundframeError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<hound::Error> for SoundframeError {
    fn from(value: hound::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<&str> for SoundframeError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SoundframeError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
