use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

/// Cooperative pause/stop signaling shared between a job runner, its pool
/// workers, and the orchestrator. Workers call `wait_if_paused` at chunk and
/// poll boundaries; they never busy-wait while paused.
#[derive(Debug)]
pub struct TaskControl {
    running: AtomicBool,
    paused: Mutex<bool>,
    cond: Condvar,
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskControl {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            paused: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn pause(&self) {
        let mut paused = self.paused.lock().expect("pause lock");
        *paused = true;
    }

    pub fn resume(&self) {
        let mut paused = self.paused.lock().expect("pause lock");
        *paused = false;
        self.cond.notify_all();
    }

    /// Clears the pause flag so blocked workers wake and observe the stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut paused = self.paused.lock().expect("pause lock");
        *paused = false;
        self.cond.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock().expect("pause lock")
    }

    /// Blocks while paused; returns immediately once resumed or stopped.
    pub fn wait_if_paused(&self) {
        let mut paused = self.paused.lock().expect("pause lock");
        while *paused && self.running.load(Ordering::SeqCst) {
            paused = self.cond.wait(paused).expect("pause wait");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn wait_returns_immediately_when_not_paused() {
        let control = TaskControl::new();
        control.wait_if_paused();
        assert!(control.is_running());
    }

    #[test]
    fn resume_wakes_a_paused_waiter() {
        let control = Arc::new(TaskControl::new());
        control.pause();

        let waiter = {
            let control = control.clone();
            std::thread::spawn(move || {
                control.wait_if_paused();
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished(), "waiter should be blocked while paused");

        control.resume();
        std::thread::sleep(Duration::from_millis(200));
        assert!(waiter.is_finished(), "waiter should wake on resume");
        waiter.join().expect("join waiter");
    }

    #[test]
    fn stop_wakes_paused_waiters_and_clears_pause() {
        let control = Arc::new(TaskControl::new());
        control.pause();

        let waiter = {
            let control = control.clone();
            std::thread::spawn(move || {
                control.wait_if_paused();
                control.is_running()
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        control.stop();
        let still_running = waiter.join().expect("join waiter");
        assert!(!still_running);
        assert!(!control.is_paused());
    }
}
