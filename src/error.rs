use anyhow::Error;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AnimateError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transient render error: {0}")]
    RenderTransient(String),

    #[error("render failed: {0}")]
    RenderFatal(String),

    #[error("capture i/o error: {0}")]
    CaptureIo(String),

    #[error("composition error: {0}")]
    Composition(String),
}

impl AnimateError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn render_transient(message: impl Into<String>) -> Self {
        Self::RenderTransient(message.into())
    }

    pub fn render_fatal(message: impl Into<String>) -> Self {
        Self::RenderFatal(message.into())
    }

    pub fn capture_io(message: impl Into<String>) -> Self {
        Self::CaptureIo(message.into())
    }

    pub fn composition(message: impl Into<String>) -> Self {
        Self::Composition(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "E_CONFIG",
            Self::RenderTransient(_) => "E_RENDER_TRANSIENT",
            Self::RenderFatal(_) => "E_RENDER_FATAL",
            Self::CaptureIo(_) => "E_CAPTURE_IO",
            Self::Composition(_) => "E_COMPOSITION",
        }
    }

    /// Only transient render failures are worth another attempt on the same session.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RenderTransient(_))
    }

    /// Errors that end the whole run instead of a single frame or group.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::CaptureIo(_))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn from_error(error: &Error) -> Self {
        let code = find_animate_error(error)
            .map(AnimateError::code)
            .unwrap_or("E_INTERNAL");
        Self {
            ok: false,
            error: ErrorEnvelopeBody {
                code: code.to_owned(),
                message: format!("{error:#}"),
            },
        }
    }
}

pub fn find_animate_error(error: &Error) -> Option<&AnimateError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<AnimateError>())
}

/// True when the error chain carries a failure that must end the run.
pub fn is_fatal(error: &Error) -> bool {
    find_animate_error(error).map_or(true, AnimateError::is_fatal)
}

pub fn is_retryable(error: &Error) -> bool {
    find_animate_error(error).is_some_and(AnimateError::is_retryable)
}
