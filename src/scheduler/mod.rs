use std::time::{Duration, Instant};

struct Slot<J> {
    job: J,
    interval: Duration,
    next_due: Instant,
}

/// Explicit cooperative scheduler: a list of (interval, next-due, job)
/// slots advanced by `tick`. Due jobs are returned for the caller to run to
/// completion, one at a time; nothing here spawns or overlaps work.
pub struct Scheduler<J> {
    slots: Vec<Slot<J>>,
}

impl<J: Copy> Scheduler<J> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Register `job` to run every `interval`, first due one full interval
    /// from now.
    pub fn register(&mut self, job: J, interval: Duration) {
        self.register_at(job, interval, Instant::now());
    }

    pub fn register_at(&mut self, job: J, interval: Duration, now: Instant) {
        self.slots.push(Slot {
            job,
            interval,
            next_due: now + interval,
        });
    }

    /// Jobs due at `now`, in registration order. Each returned job's next
    /// due time is advanced past `now`, so a tick that arrives late fires a
    /// job once rather than replaying a backlog.
    pub fn tick(&mut self, now: Instant) -> Vec<J> {
        let mut due = Vec::new();
        for slot in &mut self.slots {
            if now >= slot.next_due {
                due.push(slot.job);
                while slot.next_due <= now {
                    slot.next_due += slot.interval;
                }
            }
        }
        due
    }
}

impl<J: Copy> Default for Scheduler<J> {
    fn default() -> Self {
        Self::new()
    }
}
