use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::allocator::Allocator;
use crate::error::{GcError, Result};

#[derive(Default)]
struct Signal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Background thread running [`Allocator::gc`] at a fixed interval.
///
/// Dropping the collector stops it.
pub struct Collector {
    signal: Arc<Signal>,
    thread: Option<JoinHandle<()>>,
}

impl Collector {
    pub fn spawn(allocator: Arc<Allocator>, interval: Duration) -> Result<Self> {
        let signal = Arc::new(Signal::default());

        let thread = {
            let signal = signal.clone();
            std::thread::Builder::new()
                .name(format!("gc-{}", allocator.id()))
                .spawn(move || run(&allocator, &signal, interval))
                .map_err(GcError::CollectorSpawn)?
        };

        Ok(Self {
            signal,
            thread: Some(thread),
        })
    }

    /// Stops the loop and waits for the running cycle to finish.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();

        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| GcError::CollectorPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("{}", err);
        }
    }
}

fn run(allocator: &Allocator, signal: &Signal, interval: Duration) {
    log::debug!("{}: collector started, interval {:?}", allocator.id(), interval);

    let mut stopped = signal.stopped.lock();
    while !*stopped {
        MutexGuard::unlocked(&mut stopped, || allocator.gc());
        if *stopped {
            break;
        }
        signal.wake.wait_for(&mut stopped, interval);
    }

    log::debug!("{}: collector stopped", allocator.id());
}
