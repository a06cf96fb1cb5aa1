//! Physical device selection.
//!
//! The backend needs one queue family with graphics support and Vulkan 1.3
//! (dynamic rendering, synchronization2, timeline semaphores). Among the
//! devices that qualify, discrete GPUs are preferred.

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// A device that meets the backend's requirements.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub graphics_family: u32,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown")
    }

    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.properties.device_type)
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("graphics_family", &self.graphics_family)
            .finish()
    }
}

/// Picks the highest-rated suitable device.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no device qualifies.
pub fn select_physical_device(instance: &ash::Instance) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let best = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device))
        .max_by_key(|info| rate_device_type(info.properties.device_type));

    match best {
        Some(info) => {
            info!(
                "Selected GPU: '{}' ({})",
                info.device_name(),
                info.device_type_name()
            );
            Ok(info)
        }
        None => {
            warn!("No GPU supports Vulkan 1.3 with a graphics queue");
            Err(RhiError::NoSuitableGpu)
        }
    }
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let name = properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if !supports_api_1_3(properties.api_version) {
        debug!("GPU '{}' skipped: Vulkan 1.3 not supported", name);
        return None;
    }

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let Some(graphics_family) = find_graphics_family(&families) else {
        debug!("GPU '{}' skipped: no graphics queue family", name);
        return None;
    };

    Some(PhysicalDeviceInfo {
        device,
        properties,
        graphics_family,
    })
}

fn supports_api_1_3(version: u32) -> bool {
    let major = vk::api_version_major(version);
    let minor = vk::api_version_minor(version);
    major > 1 || (major == 1 && minor >= 3)
}

fn find_graphics_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .position(|f| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32)
}

fn rate_device_type(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 3,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
        _ => 0,
    }
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_version_check() {
        assert!(supports_api_1_3(vk::make_api_version(0, 1, 3, 0)));
        assert!(supports_api_1_3(vk::make_api_version(0, 1, 4, 2)));
        assert!(!supports_api_1_3(vk::make_api_version(0, 1, 2, 198)));
    }

    #[test]
    fn test_graphics_family_search() {
        let families = [
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            },
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                queue_count: 1,
                ..Default::default()
            },
        ];
        assert_eq!(find_graphics_family(&families), Some(1));
        assert_eq!(find_graphics_family(&families[..1]), None);
    }

    #[test]
    fn test_discrete_preferred() {
        assert!(
            rate_device_type(vk::PhysicalDeviceType::DISCRETE_GPU)
                > rate_device_type(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
    }
}
