use ash::vk;

/// 可以设置 debug name 的 Vulkan 对象
pub trait DebugType {
    fn debug_type_name() -> &'static str;
    fn vk_handle(&self) -> impl vk::Handle;
}

/// 从 handle 类型中取出 ObjectType
#[inline]
pub(crate) fn object_type_of<H: vk::Handle>(_: &H) -> vk::ObjectType {
    H::TYPE
}
