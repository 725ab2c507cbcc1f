//! Lumis 工具集
//!
//! 提供日志初始化、枚举索引表以及 workspace 路径等通用工具。
//!
//! # IndexedEnum
//! 为无字段枚举生成 `COUNT`/`ALL`/`index()`，配合 [`enum_table::EnumTable`]
//! 使用，代替字符串作为 key 的 map，在编译期检查穷尽性。

pub mod enum_table;
pub mod init_log;
pub mod resource;
