pub mod debug_messenger;
pub mod physical_device;
pub mod vulkan_core;
pub mod vulkan_device;
