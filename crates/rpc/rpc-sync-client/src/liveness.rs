// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

/// What the client knows about the server's liveness. Written only by the subscribe loop.
#[derive(Debug)]
pub(crate) struct Liveness {
    last_heartbeat: Mutex<SystemTime>,
    alive: AtomicBool,
    lost: AtomicU64,
}

impl Liveness {
    pub fn new(now: SystemTime) -> Self {
        Self {
            last_heartbeat: Mutex::new(now),
            alive: AtomicBool::new(true),
            lost: AtomicU64::new(0),
        }
    }

    pub fn reset(&self, now: SystemTime) {
        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = now;
        self.alive.store(true, Ordering::SeqCst);
    }

    /// Any broadcast at all proves the server is reachable.
    pub fn record_message(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    pub fn record_heartbeat(&self, sent_at: SystemTime) {
        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = sent_at;
        self.record_message();
    }

    /// Record that a whole tolerance window passed in silence. Returns true if the server was
    /// considered alive until now.
    pub fn record_lost(&self) -> bool {
        self.lost.fetch_add(1, Ordering::SeqCst);
        self.alive.swap(false, Ordering::SeqCst)
    }

    pub fn last_heartbeat(&self) -> SystemTime {
        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn lost_windows(&self) -> u64 {
        self.lost.load(Ordering::SeqCst)
    }
}
