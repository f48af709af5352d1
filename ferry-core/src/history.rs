use std::collections::VecDeque;

use crate::message::{Envelope, MessageKind};

/// Bounded record of recent traffic, split by direction.
///
/// Received messages keep arrival order with the newest at the end; sent
/// messages keep the newest at the front. Both sides share one capacity and
/// evict their oldest entry on overflow, so a chatty peer cannot grow the
/// engine's footprint without bound.
#[derive(Debug)]
pub struct History {
    received: VecDeque<Envelope>,
    sent: VecDeque<Envelope>,
    capacity: usize,
}

impl History {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            received: VecDeque::with_capacity(capacity),
            sent: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record_received(&mut self, env: Envelope) {
        if self.received.len() == self.capacity {
            self.received.pop_front();
        }
        self.received.push_back(env);
    }

    pub fn record_sent(&mut self, env: Envelope) {
        if self.sent.len() == self.capacity {
            self.sent.pop_back();
        }
        self.sent.push_front(env);
    }

    pub fn received(&self) -> impl Iterator<Item = &Envelope> {
        self.received.iter()
    }

    pub fn sent(&self) -> impl Iterator<Item = &Envelope> {
        self.sent.iter()
    }

    pub fn received_len(&self) -> usize {
        self.received.len()
    }

    pub fn sent_len(&self) -> usize {
        self.sent.len()
    }

    pub fn latest_received(&self) -> Option<&Envelope> {
        self.received.back()
    }

    pub fn latest_sent(&self) -> Option<&Envelope> {
        self.sent.front()
    }

    /// Most recent received message of the given kind, if any.
    pub fn latest_received_of_kind(&self, kind: &MessageKind) -> Option<&Envelope> {
        self.received.iter().rev().find(|env| &env.kind == kind)
    }

    /// Most recent sent message of the given kind, if any.
    pub fn latest_sent_of_kind(&self, kind: &MessageKind) -> Option<&Envelope> {
        self.sent.iter().find(|env| &env.kind == kind)
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(body: &str) -> Envelope {
        Envelope::text(body)
    }

    #[test]
    fn test_received_keeps_newest_last() {
        let mut history = History::new(8);
        history.record_received(text("first"));
        history.record_received(text("second"));
        let bodies: Vec<_> = history.received().map(|e| e.body.as_str()).collect();
        assert_eq!(bodies, ["first", "second"]);
        assert_eq!(history.latest_received().unwrap().body, "second");
    }

    #[test]
    fn test_sent_keeps_newest_first() {
        let mut history = History::new(8);
        history.record_sent(text("first"));
        history.record_sent(text("second"));
        let bodies: Vec<_> = history.sent().map(|e| e.body.as_str()).collect();
        assert_eq!(bodies, ["second", "first"]);
        assert_eq!(history.latest_sent().unwrap().body, "second");
    }

    #[test]
    fn test_overflow_evicts_oldest_on_both_sides() {
        let mut history = History::new(3);
        for i in 0..5 {
            history.record_received(text(&format!("r{i}")));
            history.record_sent(text(&format!("s{i}")));
        }
        assert_eq!(history.received_len(), 3);
        assert_eq!(history.sent_len(), 3);
        let received: Vec<_> = history.received().map(|e| e.body.as_str()).collect();
        assert_eq!(received, ["r2", "r3", "r4"]);
        let sent: Vec<_> = history.sent().map(|e| e.body.as_str()).collect();
        assert_eq!(sent, ["s4", "s3", "s2"]);
    }

    #[test]
    fn test_latest_of_kind_scans_from_newest() {
        let mut history = History::new(8);
        history.record_received(Envelope::image("img-old"));
        history.record_received(text("note"));
        history.record_received(Envelope::image("img-new"));
        history.record_received(text("later"));

        let latest = history
            .latest_received_of_kind(&MessageKind::Image)
            .unwrap();
        assert_eq!(latest.body, "img-new");
        assert!(history
            .latest_received_of_kind(&MessageKind::File)
            .is_none());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut history = History::new(0);
        history.record_received(text("only"));
        assert_eq!(history.received_len(), 1);
        assert_eq!(history.capacity(), 1);
    }
}
