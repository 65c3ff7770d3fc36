use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Keys whose first execution is still running.
#[derive(Debug, Default)]
pub struct InFlight {
    keys: Mutex<HashSet<String>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as executing. Returns false if it already was.
    pub fn try_acquire(&self, key: &str) -> bool {
        let mut keys = self.keys.lock();
        if keys.contains(key) {
            return false;
        }
        keys.insert(key.to_string())
    }

    pub fn release(&self, key: &str) {
        self.keys.lock().remove(key);
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.keys.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquire `key` and tie its release to the returned guard.
    pub fn claim(self: &Arc<Self>, key: &str) -> Option<InFlightGuard> {
        if !self.try_acquire(key) {
            return None;
        }
        Some(InFlightGuard {
            set: Arc::clone(self),
            key: key.to_string(),
        })
    }
}

/// Releases its key when dropped, on every exit path including unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    set: Arc<InFlight>,
    key: String,
}

impl InFlightGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.release(&self.key);
    }
}
