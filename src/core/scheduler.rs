//! Event scheduler: two ordered queues of timed callbacks (spec.md §4.1).
//!
//! `original_source/events.c` represents a callback as a function
//! pointer plus an intrusive link; the original dispatcher can be any
//! one of dozens of distinct C functions. In this port every possible
//! callback is known statically (VDG edges, WD279x service, tape
//! edges, cart FIRQ pulses, audio flush), so instead of boxing
//! closures we tag each event with what it means and let
//! [`crate::machine::Machine::run_queue`] match on the tag and call
//! the right subsystem method directly -- the idiomatic Rust
//! replacement for a nullable function-pointer dispatch table, and it
//! keeps every event free of any reference back into the component
//! that scheduled it (spec.md §9 "Design notes").

use super::tick::{tick_after, Tick};

pub type EventId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTag {
    VdgHsFall,
    VdgHsRise,
    VdgFsFall,
    VdgFsRise,
    FdcState,
    FdcIndexPulse,
    FdcIndexPulseReset,
    TapeEdge,
    CartFirqPulse,
    AudioFlush,
}

#[derive(Debug, Clone, Copy)]
struct Event {
    id: EventId,
    at_tick: Tick,
    tag: EventTag,
}

/// One of the core's two queues (spec.md §3 "Event"). Kept as a sorted
/// `Vec` rather than an intrusive linked list -- the queue depths here
/// are a handful of entries, so the O(n) insert/search the original
/// performs on its linked list costs nothing extra as a `Vec`, and we
/// get memory safety without `unsafe`.
#[derive(Default)]
pub struct EventQueue {
    events: Vec<Event>,
    next_id: EventId,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            next_id: 0,
        }
    }

    /// Schedule a fresh event, returning its id.
    pub fn schedule(&mut self, at_tick: Tick, tag: EventTag) -> EventId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.insert(Event { id, at_tick, tag });
        id
    }

    /// Re-time an existing event identified by `id`, dequeuing it first
    /// if still queued -- same semantics as `event_queue()` being called
    /// on an event that is already on a list (spec.md §4.1).
    pub fn reschedule(&mut self, id: EventId, at_tick: Tick, tag: EventTag) {
        self.dequeue(id);
        self.insert(Event { id, at_tick, tag });
    }

    fn insert(&mut self, event: Event) {
        // Insertion-ordered by `at_tick` under the modular order induced
        // by "now"; ties keep FIFO order (spec.md §5 "Ordering").
        let pos = self
            .events
            .iter()
            .position(|e| tick_after(e.at_tick, event.at_tick))
            .unwrap_or(self.events.len());
        self.events.insert(pos, event);
    }

    pub fn dequeue(&mut self, id: EventId) {
        self.events.retain(|e| e.id != id);
    }

    pub fn is_queued(&self, id: EventId) -> bool {
        self.events.iter().any(|e| e.id == id)
    }

    /// True iff the head event's `at_tick` has been reached.
    pub fn pending(&self, now: Tick) -> bool {
        self.events
            .first()
            .map(|e| !tick_after(e.at_tick, now))
            .unwrap_or(false)
    }

    /// Pop the due head event, if any.
    pub fn pop_due(&mut self, now: Tick) -> Option<(EventId, EventTag)> {
        if self.pending(now) {
            let e = self.events.remove(0);
            Some((e.id, e.tag))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_dispatch_in_tick_order_and_fifo_on_ties() {
        let mut q = EventQueue::new();
        let a = q.schedule(100, EventTag::VdgHsFall);
        let _b = q.schedule(50, EventTag::VdgFsFall);
        let c = q.schedule(100, EventTag::VdgHsRise);

        assert!(!q.pending(49));
        assert!(q.pending(50));

        let (first, tag) = q.pop_due(200).unwrap();
        assert_ne!(first, a);
        assert_eq!(tag, EventTag::VdgFsFall);

        let (second, tag2) = q.pop_due(200).unwrap();
        assert_eq!(second, a);
        assert_eq!(tag2, EventTag::VdgHsFall);

        let (third, _) = q.pop_due(200).unwrap();
        assert_eq!(third, c);
        assert!(q.pop_due(200).is_none());
    }

    #[test]
    fn reschedule_moves_existing_event() {
        let mut q = EventQueue::new();
        let id = q.schedule(10, EventTag::AudioFlush);
        q.reschedule(id, 5, EventTag::AudioFlush);
        assert!(q.pending(5));
        let (popped, _) = q.pop_due(5).unwrap();
        assert_eq!(popped, id);
    }

    #[test]
    fn dequeue_is_idempotent() {
        let mut q = EventQueue::new();
        let id = q.schedule(10, EventTag::AudioFlush);
        q.dequeue(id);
        q.dequeue(id);
        assert!(!q.is_queued(id));
    }
}
