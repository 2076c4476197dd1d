//! Thread-per-node scheduler for streaming graphs
//!
//! Spawns a dedicated thread for each node and manages their lifecycle.
//! The scheduler calls `work()` repeatedly in a loop; the node processes one
//! batch of items per call and returns the count. `Err(WorkError::Shutdown)`
//! from `work()` winds the node's thread down cleanly; any other error stops
//! it with a report.

use super::errors::WorkError;
use super::node::ProcessNode;
use super::ports::{InputPort, OutputPort};
use super::watchdog::Watchdog;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver as StdReceiver, Sender as StdSender, channel};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Runtime scheduler that executes a streaming graph
pub struct Scheduler {
    threads: Vec<(String, JoinHandle<()>)>,
    stop_signal: Arc<AtomicBool>,
    completion_tx: StdSender<String>,
    completion_rx: Option<StdReceiver<String>>,
    watchdog: Watchdog,
    watchdog_handle: JoinHandle<()>,
}

impl Scheduler {
    /// Create a new scheduler with watchdog monitoring
    pub fn new() -> Self {
        let (completion_tx, completion_rx) = channel();
        let watchdog = Watchdog::new();
        let watchdog_handle = watchdog.start_monitoring_thread();
        info!("Watchdog enabled - will report operations blocked >5 seconds");
        Self {
            threads: Vec::new(),
            stop_signal: Arc::new(AtomicBool::new(false)),
            completion_tx,
            completion_rx: Some(completion_rx),
            watchdog,
            watchdog_handle,
        }
    }

    /// Get a reference to the watchdog
    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Start a process node in its own thread.
    /// Process nodes include sources (0 inputs), sinks (0 outputs), and
    /// transformers (N inputs, M outputs).
    pub fn start_process(
        &mut self,
        mut node: Box<dyn ProcessNode>,
        inputs: Vec<InputPort>,
        outputs: Vec<OutputPort>,
    ) {
        let stop_signal = Arc::clone(&self.stop_signal);
        let completion_tx = self.completion_tx.clone();
        let name = node.name().to_string();
        let thread_name = name.clone();

        debug!("Starting process node: {}", name);

        let handle = thread::spawn(move || {
            let mut items_produced = 0usize;

            loop {
                if stop_signal.load(Ordering::Relaxed) || node.should_stop() {
                    break;
                }

                match node.work(&inputs, &outputs) {
                    Ok(n) => {
                        items_produced += n;
                    }
                    Err(WorkError::Shutdown) => {
                        debug!("[{}] Shutdown", thread_name);
                        break;
                    }
                    Err(e) => {
                        error!("[{}] Work error: {}", thread_name, e);
                        break;
                    }
                }
            }

            info!(
                "[{}] Shutdown. Produced {} items.",
                thread_name, items_produced
            );

            // Drop outputs/inputs/node to close channels
            drop(outputs);
            drop(inputs);
            drop(node);

            // Notify scheduler that this thread is about to complete
            let _ = completion_tx.send(thread_name.clone());
        });

        self.threads.push((name, handle));
    }

    /// Signal all nodes to stop
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::Relaxed);
    }

    /// Wait for all node threads to complete.
    /// Uses a completion notification channel to join threads as they finish.
    pub fn wait(mut self) {
        let completion_rx = self
            .completion_rx
            .take()
            .expect("completion_rx already taken");

        // Drop the main completion sender so the channel closes when all
        // threads complete
        drop(self.completion_tx);

        let total_threads = self.threads.len();
        let mut completed = 0;

        info!("Waiting for {} threads to complete...", total_threads);

        // Convert to HashMap for O(1) lookup by name
        let mut threads_by_name: HashMap<String, JoinHandle<()>> =
            self.threads.into_iter().collect();

        // Block on completion notifications - no busy-waiting
        while completed < total_threads {
            match completion_rx.recv() {
                Ok(thread_name) => {
                    completed += 1;
                    if let Some(handle) = threads_by_name.remove(&thread_name) {
                        match handle.join() {
                            Ok(_) => info!(
                                "[{}] Thread completed ({}/{})",
                                thread_name, completed, total_threads
                            ),
                            Err(e) => error!(
                                "[{}] Thread panicked ({}/{}): {:?}",
                                thread_name, completed, total_threads, e
                            ),
                        }
                    }
                }
                Err(_) => {
                    // Channel closed - all thread senders dropped
                    break;
                }
            }
        }

        info!("All {} threads completed", total_threads);

        // Stop watchdog
        self.watchdog.stop();
        let _ = self.watchdog_handle.join();
    }

    /// Get the number of running threads
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
