// Copyright 2026 The kvikk authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Request and reply counters plus the periodic statistics reporter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::info;

/// The two counters the statistics thread observes.
///
/// The request counter is bumped only by the reactor thread, so a relaxed
/// atomic suffices; the reply counter is shared with the reactor's
/// completion path and keeps its own mutex.
#[derive(Debug, Default)]
pub struct Stats {
    requests: AtomicU64,
    replies: Mutex<u64>,
}

impl Stats {
    /// Fresh zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts an accepted connection. Reactor thread only.
    #[inline]
    pub fn count_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a completed dynamic reply.
    pub fn count_reply(&self) {
        *self.replies.lock().expect("reply counter poisoned") += 1;
    }

    /// Total accepted connections so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Total completed dynamic replies so far.
    pub fn reply_count(&self) -> u64 {
        *self.replies.lock().expect("reply counter poisoned")
    }
}

/// Spawns the detached reporter thread, logging absolute counts and
/// per-interval rates.
pub fn spawn_reporter(stats: Arc<Stats>, interval: Duration) {
    thread::spawn(move || {
        let mut last_requests = 0;
        let mut last_replies = 0;
        loop {
            thread::sleep(interval);
            let requests = stats.request_count();
            let replies = stats.reply_count();
            let secs = interval.as_secs().max(1);
            info!(
                "req: {requests}\trep: {replies}\treq/s: {}\trep/s: {}",
                (requests - last_requests) / secs,
                (replies - last_replies) / secs,
            );
            last_requests = requests;
            last_replies = replies;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_advance() {
        let stats = Stats::new();
        assert_eq!(stats.request_count(), 0);
        assert_eq!(stats.reply_count(), 0);
        stats.count_request();
        stats.count_request();
        stats.count_reply();
        assert_eq!(stats.request_count(), 2);
        assert_eq!(stats.reply_count(), 1);
    }

    #[test]
    fn reply_counter_is_shared_safely() {
        let stats = Arc::new(Stats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        stats.count_reply();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.reply_count(), 400);
    }
}
