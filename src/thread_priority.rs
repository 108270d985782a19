// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::debug;

/// Default priority percentage for background sample loading threads.
pub const DEFAULT_BACKGROUND_PRIORITY: u8 = 50;

/// Highest crossplatform priority value accepted by `ThreadPriorityValue`.
const MAX_PRIORITY_VALUE: u8 = 99;

/// Maps a 0-100 percentage onto the crossplatform 0-99 priority range.
pub fn priority_from_percent(percent: u8) -> u8 {
    (u32::from(percent.min(100)) * u32::from(MAX_PRIORITY_VALUE) / 100) as u8
}

/// Raises the priority of the calling thread so that background file reads are
/// less likely to miss the moment a voice needs their data.
///
/// This is best effort: failures are logged and otherwise ignored. Loader
/// threads belong to the executor and are reused, so this is applied again at
/// the start of every job.
pub fn raise_current_thread_priority(percent: u8) {
    let value = match ThreadPriorityValue::try_from(priority_from_percent(percent)) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = ?e, percent, "Invalid loader thread priority");
            return;
        }
    };
    let tp = ThreadPriority::Crossplatform(value);

    #[cfg(unix)]
    {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        let tid = thread_native_id();
        match set_thread_priority_and_policy(
            tid,
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::RoundRobin),
        ) {
            Ok(()) => return,
            Err(e) => {
                debug!(error = ?e, "Cannot set round-robin scheduling for loader thread");
            }
        }
    }

    if let Err(e) = set_current_thread_priority(tp) {
        debug!(error = ?e, "Cannot set loader thread priority");
    }
}
