//! Vulkan instance creation.
//!
//! The backend renders offscreen, so no surface extensions are requested. The
//! Khronos validation layer and a `tracing`-backed debug messenger are added
//! when asked for and available.

use std::ffi::CStr;

use ash::{Entry, vk};
use tracing::{error, info, warn};

use crate::error::RhiResult;

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance with optional validation.
pub struct Instance {
    // Keeps the loader library mapped while the instance exists.
    _entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    /// Loads the Vulkan library and creates an API 1.3 instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the library cannot be loaded or instance creation
    /// fails. A missing validation layer only logs a warning.
    pub fn new(enable_validation: bool) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let validation = enable_validation && Self::is_validation_layer_available(&entry)?;
        if enable_validation && !validation {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"kiln")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"kiln")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let extensions: Vec<*const std::ffi::c_char> = if validation {
            vec![ash::ext::debug_utils::NAME.as_ptr()]
        } else {
            Vec::new()
        };
        let layers: Vec<*const std::ffi::c_char> = if validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        info!("Vulkan instance created (API 1.3, validation: {})", validation);

        let debug_utils = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            match unsafe { loader.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        Ok(Self {
            _entry: entry,
            instance,
            debug_utils,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_utils.is_some()
    }

    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        let layers = unsafe { entry.enumerate_instance_layer_properties()? };
        Ok(layers.iter().any(|layer| {
            layer
                .layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
        }))
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() {
        return vk::FALSE;
    }
    let data = unsafe { &*callback_data };
    let message = if data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(data.p_message).to_string_lossy() }
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[Vulkan {:?}] {}", message_type, message);
    } else {
        warn!("[Vulkan {:?}] {}", message_type, message);
    }
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RhiError;

    #[test]
    fn test_instance_creation_without_validation() {
        match Instance::new(false) {
            Ok(instance) => assert!(!instance.has_validation()),
            // No Vulkan loader or driver on this machine.
            Err(RhiError::Loading(_)) | Err(RhiError::Vulkan(_)) => {}
            Err(e) => panic!("Unexpected error: {e:?}"),
        }
    }
}
