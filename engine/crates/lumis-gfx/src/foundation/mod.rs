pub mod color;
pub mod debug_type;
pub mod deletion_stack;
pub mod device;
pub mod device_api;
