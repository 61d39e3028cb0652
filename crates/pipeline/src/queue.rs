//! Pending-request queue shared by the interactive thread and the render
//! worker.
//!
//! The interactive thread appends and clears; the worker blocks in
//! `pop_blocking` until work arrives or the queue is stopped. This is the
//! single synchronization point between the two threads.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use tileview_scheduler::RenderRequest;

struct QueueState {
    pending: VecDeque<RenderRequest>,
    stopped: bool,
}

pub struct RenderQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl RenderQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState { pending: VecDeque::new(), stopped: false }),
            available: Condvar::new(),
        }
    }

    /// Append a request and wake the worker. Never blocks the caller.
    /// Requests enqueued after `stop` are dropped.
    pub fn enqueue(&self, request: RenderRequest) {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return;
        }
        state.pending.push_back(request);
        drop(state);
        self.available.notify_one();
    }

    /// Drop every request that has not been started yet. Called at the
    /// start of each loading pass so work from an abandoned scroll
    /// position is never rendered. Returns the number of dropped requests.
    pub fn clear_pending(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let dropped = state.pending.len();
        state.pending.clear();
        dropped
    }

    /// Block until a request is available or the queue is stopped.
    /// Returns `None` once stopped; the worker exits on that.
    pub fn pop_blocking(&self) -> Option<RenderRequest> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.stopped {
                return None;
            }
            if let Some(request) = state.pending.pop_front() {
                return Some(request);
            }
            state = self.available.wait(state).unwrap();
        }
    }

    /// Stop the queue: pending work is dropped, the worker is woken to
    /// observe the stop, and later enqueues are ignored.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        state.pending.clear();
        drop(state);
        self.available.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RenderQueue {
    fn default() -> Self {
        Self::new()
    }
}
