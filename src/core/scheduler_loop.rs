//! Dedicated OS thread driving [`Scheduler::tick`].
//!
//! The thread holds only a `Weak` reference, so dropping the last
//! `Arc<Scheduler>` ends the loop. Stop requests travel over a crossbeam
//! channel whose `recv_timeout` doubles as the tick timer; dropping the sender
//! unblocks the thread immediately.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::core::scheduler::LoopStep;
use crate::core::{Scheduler, SchedulerError};

pub(crate) enum LoopCommand {
    Stop,
}

/// Control side of a running loop thread.
pub(crate) struct LoopWorker {
    control: Sender<LoopCommand>,
    thread: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the control-loop thread. The first tick runs immediately.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::AlreadyRunning` if a loop is already attached
    /// - `SchedulerError::Spawn` if the OS refuses the thread
    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut worker = self.worker.lock();
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }
        // A loop that stopped itself after escalation leaves its handle behind.
        if let Some(stale) = worker.take() {
            drop(stale.control);
            if stale.thread.join().is_err() {
                warn!("previous scheduler loop thread panicked");
            }
        }

        let (control, commands) = bounded::<LoopCommand>(1);
        let scheduler = Arc::downgrade(self);
        self.loop_active.store(true, Ordering::Release);
        let thread = thread::Builder::new()
            .name("tier-scheduler".to_string())
            .spawn(move || run_loop(&scheduler, &commands))
            .map_err(|e| {
                self.loop_active.store(false, Ordering::Release);
                SchedulerError::Spawn(e.to_string())
            })?;

        *worker = Some(LoopWorker { control, thread });
        info!(
            tick_interval_ms = self.config().tick_interval_ms,
            "scheduler loop started"
        );
        Ok(())
    }

    /// Stop the loop and wait for the current tick to finish. No-op when no
    /// loop is attached.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = worker.control.try_send(LoopCommand::Stop);
        drop(worker.control);
        // The loop thread itself may drop the last `Arc`; never join ourselves.
        if worker.thread.thread().id() != thread::current().id() && worker.thread.join().is_err() {
            warn!("scheduler loop thread panicked");
        }
        self.loop_active.store(false, Ordering::Release);
        info!("scheduler loop stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(scheduler: &Weak<Scheduler>, commands: &Receiver<LoopCommand>) {
    let mut wait = Duration::ZERO;
    loop {
        match commands.recv_timeout(wait) {
            Ok(LoopCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        let Some(scheduler) = scheduler.upgrade() else {
            break;
        };
        match scheduler.guarded_tick() {
            LoopStep::Continue(next) => wait = next,
            LoopStep::Stop => {
                scheduler.loop_active.store(false, Ordering::Release);
                break;
            }
        }
    }
    debug!("scheduler loop exiting");
}
