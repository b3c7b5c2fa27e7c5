// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Map from response-topic string to an integer subscribe-count. First
//! increment issues a broker subscribe; decrement to zero issues a broker
//! unsubscribe. Without this, two concurrent calls to the same service
//! would race subscribe and unsubscribe.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct TopicRefcount {
    counts: Mutex<HashMap<String, usize>>,
}

impl TopicRefcount {
    pub fn new() -> Self {
        TopicRefcount::default()
    }

    /// Returns `true` when this is the first outstanding interest in
    /// `topic` (the caller must issue a broker subscribe).
    pub fn increment(&self, topic: &str) -> bool {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(topic.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Returns `true` when this decrement brought `topic`'s count to zero
    /// (the caller must issue a broker unsubscribe).
    pub fn decrement(&self, topic: &str) -> bool {
        let mut counts = self.counts.lock().unwrap();
        match counts.get_mut(topic) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                counts.remove(topic);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn count(&self, topic: &str) -> usize {
        self.counts.lock().unwrap().get(topic).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refcount_lifecycle() {
        let rc = TopicRefcount::new();
        assert!(rc.increment("t"));
        assert!(!rc.increment("t"));
        assert_eq!(rc.count("t"), 2);
        assert!(!rc.decrement("t"));
        assert!(rc.decrement("t"));
        assert_eq!(rc.count("t"), 0);
    }

    #[test]
    fn test_decrement_below_zero_is_noop() {
        let rc = TopicRefcount::new();
        assert!(!rc.decrement("never-subscribed"));
    }
}
