//! Vulkan instance and device setup.
//!
//! Manages the Vulkan instance, physical device selection, logical device,
//! and the graphics queue the backend submits to.

use super::error::VulkanError;

use ash::vk;

/// Vulkan context: instance, device, and graphics queue.
pub struct VulkanContext {
    /// Vulkan entry point.
    #[allow(dead_code)]
    entry: ash::Entry,
    /// Vulkan instance.
    pub(super) instance: ash::Instance,
    /// Physical device (GPU).
    pub(super) physical_device: vk::PhysicalDevice,
    /// Logical device.
    pub(super) device: ash::Device,
    /// Graphics queue family index.
    pub(super) graphics_queue_family: u32,
    /// Graphics queue.
    pub(super) graphics_queue: vk::Queue,
    /// Device memory properties, for memory-type reporting.
    pub(super) memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanContext {
    /// Create a new Vulkan context.
    ///
    /// This will:
    /// 1. Load the Vulkan library
    /// 2. Create a Vulkan instance
    /// 3. Select a GPU (discrete preferred) with a graphics queue
    /// 4. Create a logical device with one graphics queue
    ///
    /// Returns an error if Vulkan is not available or no compatible GPU is
    /// found.
    pub fn new() -> Result<Self, VulkanError> {
        let entry = unsafe { ash::Entry::load()? };

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"Basalt")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"Basalt")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let create_info = vk::InstanceCreateInfo::default().application_info(&app_info);
        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(|_| VulkanError::InitializationFailed)?
        };

        let physical_devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(|_| VulkanError::NoCompatibleDevice)?
        };
        if physical_devices.is_empty() {
            unsafe { instance.destroy_instance(None) };
            return Err(VulkanError::NoCompatibleDevice);
        }

        let (physical_device, graphics_queue_family) =
            match Self::select_physical_device(&instance, &physical_devices) {
                Some(selected) => selected,
                None => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(VulkanError::NoGraphicsQueue);
                }
            };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        tracing::info!(
            device = ?unsafe {
                std::ffi::CStr::from_ptr(properties.device_name.as_ptr())
            },
            queue_family = graphics_queue_family,
            "selected Vulkan device"
        );

        let queue_priority = [1.0f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priority)];

        let device_create_info =
            vk::DeviceCreateInfo::default().queue_create_infos(&queue_create_infos);
        let device = unsafe {
            instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|_| VulkanError::InitializationFailed)?
        };
        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        Ok(Self {
            entry,
            instance,
            physical_device,
            device,
            graphics_queue_family,
            graphics_queue,
            memory_properties,
        })
    }

    /// Pick the best physical device: discrete GPUs first, then integrated,
    /// then anything with a graphics queue.
    fn select_physical_device(
        instance: &ash::Instance,
        devices: &[vk::PhysicalDevice],
    ) -> Option<(vk::PhysicalDevice, u32)> {
        let mut best: Option<(vk::PhysicalDevice, u32, u32)> = None;
        for &device in devices {
            let properties = unsafe { instance.get_physical_device_properties(device) };
            let families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };
            let graphics = families
                .iter()
                .position(|qf| qf.queue_flags.contains(vk::QueueFlags::GRAPHICS));
            let Some(family) = graphics else { continue };

            let score = match properties.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 3,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
                _ => 1,
            };
            if best.map_or(true, |(_, _, s)| score > s) {
                best = Some((device, family as u32, score));
            }
        }
        best.map(|(device, family, _)| (device, family))
    }

    /// Destroy the device and instance. The caller must have destroyed every
    /// object created from the device first.
    pub(super) fn destroy(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
