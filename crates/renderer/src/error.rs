//! Renderer error type.

use kiln_rhi::RhiError;
use thiserror::Error;

/// Errors reported by the renderer.
///
/// Backend failures arrive as [`RenderError::Rhi`] and keep the backend's
/// fatal classification. Everything else describes a request the renderer
/// refused: the frame can continue after dropping it.
#[derive(Error, Debug)]
pub enum RenderError {
    /// A backend call failed.
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// A fixed-capacity pool ran out within one frame.
    #[error("{pool} exhausted (capacity {capacity})")]
    CapacityExhausted { pool: &'static str, capacity: u32 },

    /// A resource was bound through a view kind it was not created for, or a
    /// material was bound without a pipeline state.
    #[error("Invalid binding: {0}")]
    InvalidBindingState(String),

    /// A frame operation was called out of order.
    #[error("{operation} called while {found} (expected {expected})")]
    InvalidFrameState {
        operation: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    /// A handle did not resolve, usually because it was released.
    #[error("Unknown handle: {0}")]
    UnknownHandle(String),

    /// Configuration rejected at construction.
    #[error(transparent)]
    Config(#[from] kiln_core::Error),
}

impl RenderError {
    /// Returns true if the renderer cannot continue.
    pub fn is_fatal(&self) -> bool {
        match self {
            RenderError::Rhi(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Result type alias for renderer operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_recoverable() {
        let err = RenderError::CapacityExhausted {
            pool: "model constant slots",
            capacity: 4,
        };
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "model constant slots exhausted (capacity 4)");
    }

    #[test]
    fn test_rhi_classification_is_kept() {
        let timeout: RenderError = RhiError::SynchronizationTimeout {
            value: 3,
            completed: 1,
        }
        .into();
        assert!(timeout.is_fatal());

        let bad_handle: RenderError = RhiError::InvalidHandle("heap".into()).into();
        assert!(!bad_handle.is_fatal());
    }

    #[test]
    fn test_frame_state_message() {
        let err = RenderError::InvalidFrameState {
            operation: "end_frame",
            expected: "batching",
            found: "idle",
        };
        assert_eq!(err.to_string(), "end_frame called while idle (expected batching)");
    }
}
