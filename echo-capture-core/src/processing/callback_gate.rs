use parking_lot::RwLock;

/// Quiesce barrier between device callbacks and teardown.
///
/// Every callback body runs under a shared read guard; [`close`](Self::close)
/// takes the write guard, so it returns only after callbacks already in
/// flight have finished, and every later callback is skipped. Teardown can
/// then release the device without racing a half-run callback.
///
/// A callback must not close its own gate.
#[derive(Debug)]
pub struct CallbackGate {
    open: RwLock<bool>,
}

impl CallbackGate {
    pub fn new() -> Self {
        Self {
            open: RwLock::new(true),
        }
    }

    /// Run `f` if the gate is still open.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let open = self.open.read();
        if *open {
            Some(f())
        } else {
            None
        }
    }

    /// Close the gate, blocking until in-flight callbacks complete.
    pub fn close(&self) {
        *self.open.write() = false;
    }

    pub fn is_open(&self) -> bool {
        *self.open.read()
    }
}

impl Default for CallbackGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn runs_while_open_and_skips_after_close() {
        let gate = CallbackGate::new();
        assert_eq!(gate.run(|| 7), Some(7));

        gate.close();
        assert!(!gate.is_open());
        assert_eq!(gate.run(|| 7), None);
    }

    #[test]
    fn close_waits_for_in_flight_callback() {
        let gate = Arc::new(CallbackGate::new());
        let finished = Arc::new(AtomicBool::new(false));
        let entered = Arc::new(Barrier::new(2));

        let worker = {
            let gate = Arc::clone(&gate);
            let finished = Arc::clone(&finished);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                gate.run(|| {
                    entered.wait();
                    thread::sleep(Duration::from_millis(50));
                    finished.store(true, Ordering::SeqCst);
                });
            })
        };

        entered.wait();
        gate.close();
        assert!(finished.load(Ordering::SeqCst));
        worker.join().unwrap();
    }
}
