use std::panic::{AssertUnwindSafe, catch_unwind};

struct DeletionEntry {
    name: String,
    action: Box<dyn FnOnce()>,
}

/// 资源销毁账本
///
/// 每创建一个 GPU 对象，就把对应的销毁动作放进来；`flush` 时按照与放入顺序相反的顺序执行，
/// 保证销毁顺序总是与创建顺序相反。
///
/// 可以同时存在多个账本：设备生命周期的账本与场景生命周期的账本，
/// 场景重建时只 flush 场景账本。
///
/// # Panic
/// 任意一个销毁动作 panic，都会导致只销毁了一部分资源，这时直接 abort 进程。
pub struct DeletionStack {
    name: String,
    entries: Vec<DeletionEntry>,
}
// new & init
impl DeletionStack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }
}
// getters
impl DeletionStack {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
// tools
impl DeletionStack {
    /// 只记录，不会立即执行
    pub fn push(&mut self, name: impl Into<String>, action: impl FnOnce() + 'static) {
        self.entries.push(DeletionEntry {
            name: name.into(),
            action: Box::new(action),
        });
    }

    /// 逆序执行所有的销毁动作，然后清空账本
    pub fn flush(&mut self) {
        if self.entries.is_empty() {
            return;
        }

        let _span = tracy_client::span!("DeletionStack::flush");
        log::info!("flushing deletion stack <{}>: {} entries", self.name, self.entries.len());

        while let Some(entry) = self.entries.pop() {
            log::debug!("<{}> destroy: {}", self.name, entry.name);
            let action = entry.action;
            if catch_unwind(AssertUnwindSafe(action)).is_err() {
                log::error!(
                    "<{}> failed to destroy {}, {} entries left, abort",
                    self.name,
                    entry.name,
                    self.entries.len()
                );
                std::process::abort();
            }
        }
    }
}
impl Drop for DeletionStack {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            log::error!("deletion stack <{}> dropped with {} entries, resources leaked", self.name, self.entries.len());
        }
        debug_assert!(self.entries.is_empty() || std::thread::panicking(), "DeletionStack must be flushed before drop");
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce()>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |tag: &'static str| -> Box<dyn FnOnce()> {
            let log = log_clone.clone();
            Box::new(move || log.borrow_mut().push(tag))
        };
        (log, make)
    }

    #[test]
    fn test_flush_runs_in_reverse_push_order() {
        let (log, make) = recorder();
        let mut stack = DeletionStack::new("test");
        stack.push("A", make("A"));
        stack.push("B", make("B"));
        stack.push("C", make("C"));
        assert!(log.borrow().is_empty(), "push must not run anything");

        stack.flush();
        assert_eq!(*log.borrow(), vec!["C", "B", "A"]);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_flush_empty_is_noop() {
        let mut stack = DeletionStack::new("empty");
        stack.flush();
        stack.flush();
        assert_eq!(stack.len(), 0);
    }

    #[test]
    fn test_second_flush_does_not_rerun() {
        let (log, make) = recorder();
        let mut stack = DeletionStack::new("twice");
        stack.push("A", make("A"));
        stack.flush();
        stack.flush();
        assert_eq!(*log.borrow(), vec!["A"]);
    }

    #[test]
    fn test_independent_stacks() {
        let (log, make) = recorder();
        let mut device_stack = DeletionStack::new("device");
        let mut scene_stack = DeletionStack::new("scene");
        device_stack.push("pool", make("pool"));
        scene_stack.push("image", make("image"));
        scene_stack.push("view", make("view"));

        scene_stack.flush();
        assert_eq!(*log.borrow(), vec!["view", "image"]);
        assert_eq!(device_stack.len(), 1);

        device_stack.flush();
        assert_eq!(*log.borrow(), vec!["view", "image", "pool"]);
    }
}
