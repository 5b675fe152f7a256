/// Guard that runs a closure when dropped.
///
/// The closure runs exactly once, unless the guard is [disarmed](DeferGuard::disarm).
#[must_use = "the deferred closure runs immediately if the guard is not bound"]
pub struct DeferGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> DeferGuard<F> {
    /// Runs the deferred closure now instead of on drop.
    pub fn run(mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }

    /// Drops the guard without running the closure.
    pub fn disarm(mut self) {
        self.0.take();
    }
}

impl<F: FnOnce()> Drop for DeferGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

/// Defers a closure, returning a `DeferGuard` that will
/// run it when dropped.
pub fn defer<F: FnOnce()>(f: F) -> DeferGuard<F> {
    DeferGuard(Some(f))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn test_runs_once() {
        let calls = Cell::new(0);
        let guard = defer(|| calls.set(calls.get() + 1));
        guard.run();
        assert_eq!(calls.get(), 1);

        {
            let _guard = defer(|| calls.set(calls.get() + 1));
        }
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_disarm() {
        let calls = Cell::new(0);
        defer(|| calls.set(calls.get() + 1)).disarm();
        assert_eq!(calls.get(), 0);
    }
}
