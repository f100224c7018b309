use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Holds a job's single-active flag; releases it on drop, however the run ends.
pub(crate) struct ActiveGuard<'a>(&'a AtomicBool);

impl<'a> ActiveGuard<'a> {
    /// Set the flag if it is clear. `false` means another run holds it.
    pub(crate) fn try_claim(flag: &AtomicBool) -> bool {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        Self::try_claim(flag).then(|| Self(flag))
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_is_exclusive_until_the_guard_drops() {
        let flag = AtomicBool::new(false);

        let guard = ActiveGuard::acquire(&flag);
        assert!(guard.is_some());
        assert!(ActiveGuard::acquire(&flag).is_none());

        drop(guard);
        assert!(!flag.load(Ordering::Acquire));
        assert!(ActiveGuard::acquire(&flag).is_some());
    }
}
