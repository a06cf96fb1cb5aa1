//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// The device rejected an allocation or object creation.
    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    /// A fence wait did not complete within its timeout.
    #[error("Fence wait for value {value} timed out (completed value {completed})")]
    SynchronizationTimeout { value: u64, completed: u64 },

    /// The device stopped responding.
    #[error("Device lost")]
    DeviceLost,

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// The backend cannot express the request.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,
}

impl RhiError {
    /// Returns true if the error leaves the device in an unusable state.
    ///
    /// Fatal errors should end the frame loop; the others describe a bad
    /// request that can be dropped.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RhiError::InvalidHandle(_) | RhiError::Unsupported(_))
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(RhiError::DeviceLost.is_fatal());
        assert!(RhiError::SynchronizationTimeout { value: 4, completed: 2 }.is_fatal());
        assert!(RhiError::ResourceCreation("oom".into()).is_fatal());
        assert!(RhiError::Vulkan(ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).is_fatal());
        assert!(!RhiError::InvalidHandle("heap 9".into()).is_fatal());
        assert!(!RhiError::Unsupported("uav".into()).is_fatal());
    }

    #[test]
    fn test_timeout_message() {
        let err = RhiError::SynchronizationTimeout { value: 7, completed: 5 };
        assert_eq!(
            err.to_string(),
            "Fence wait for value 7 timed out (completed value 5)"
        );
    }
}
