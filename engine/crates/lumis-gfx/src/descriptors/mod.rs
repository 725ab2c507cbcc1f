pub mod allocator;
pub mod builder;
pub mod layout_cache;
pub mod write;
