use std::marker::PhantomData;

/// 可以作为 [`EnumTable`] 索引的无字段枚举
///
/// 一般不手动实现，使用 [`indexed_enum!`](crate::indexed_enum) 生成
pub trait IndexedEnum: Copy + 'static {
    const COUNT: usize;
    /// 按照声明顺序排列的所有成员
    const ALL: &'static [Self];

    fn index(self) -> usize;
    fn name(self) -> &'static str;
}

/// 定义一个实现了 [`IndexedEnum`] 的枚举
///
/// ```ignore
/// indexed_enum! {
///     pub enum Fruit { Apple, Banana }
/// }
/// ```
#[macro_export]
macro_rules! indexed_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(usize)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$vmeta])* $variant,)*
        }

        impl $crate::enum_table::IndexedEnum for $name {
            const COUNT: usize = $crate::count_variants!($($variant),*);
            const ALL: &'static [Self] = &[$(Self::$variant),*];

            #[inline]
            fn index(self) -> usize {
                self as usize
            }

            fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant),)*
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str($crate::enum_table::IndexedEnum::name(*self))
            }
        }
    };
}

/// 辅助宏，计算变体数量
#[macro_export]
macro_rules! count_variants {
    () => (0usize);
    ($head:tt $(, $tail:tt)*) => (1usize + $crate::count_variants!($($tail),*));
}

/// 以枚举为 key 的定长表，每个 key 最多对应一个值
pub struct EnumTable<K: IndexedEnum, V> {
    slots: Vec<Option<V>>,
    _key: PhantomData<K>,
}
impl<K: IndexedEnum, V> Default for EnumTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl<K: IndexedEnum, V> EnumTable<K, V> {
    pub fn new() -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(K::COUNT).collect(),
            _key: PhantomData,
        }
    }
}
// getters
impl<K: IndexedEnum, V> EnumTable<K, V> {
    #[inline]
    pub fn get(&self, key: K) -> Option<&V> {
        self.slots[key.index()].as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        self.slots[key.index()].as_mut()
    }

    #[inline]
    pub fn contains(&self, key: K) -> bool {
        self.slots[key.index()].is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按照枚举声明顺序遍历已经存在的值
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        K::ALL.iter().zip(self.slots.iter()).filter_map(|(key, slot)| slot.as_ref().map(|v| (*key, v)))
    }
}
// tools
impl<K: IndexedEnum, V> EnumTable<K, V> {
    /// 返回被替换掉的旧值
    #[inline]
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.slots[key.index()].replace(value)
    }

    #[inline]
    pub fn remove(&mut self, key: K) -> Option<V> {
        self.slots[key.index()].take()
    }

    /// 取出所有的值，表变为空
    pub fn drain(&mut self) -> Vec<(K, V)> {
        K::ALL.iter().zip(self.slots.iter_mut()).filter_map(|(key, slot)| slot.take().map(|v| (*key, v))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::indexed_enum! {
        enum Channel {
            Red,
            Green,
            Blue,
        }
    }

    #[test]
    fn test_indexed_enum_generated_items() {
        assert_eq!(Channel::COUNT, 3);
        assert_eq!(Channel::ALL, &[Channel::Red, Channel::Green, Channel::Blue]);
        assert_eq!(Channel::Blue.index(), 2);
        assert_eq!(Channel::Green.to_string(), "Green");
    }

    #[test]
    fn test_insert_and_remove() {
        let mut table = EnumTable::<Channel, u32>::new();
        assert!(table.is_empty());

        assert_eq!(table.insert(Channel::Green, 7), None);
        assert_eq!(table.insert(Channel::Green, 8), Some(7));
        assert_eq!(table.get(Channel::Green), Some(&8));
        assert!(!table.contains(Channel::Red));

        assert_eq!(table.remove(Channel::Green), Some(8));
        assert!(table.is_empty());
    }

    #[test]
    fn test_iter_follows_declaration_order() {
        let mut table = EnumTable::<Channel, &str>::new();
        table.insert(Channel::Blue, "b");
        table.insert(Channel::Red, "r");

        let keys: Vec<_> = table.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![Channel::Red, Channel::Blue]);

        let drained = table.drain();
        assert_eq!(drained, vec![(Channel::Red, "r"), (Channel::Blue, "b")]);
        assert!(table.is_empty());
    }
}
