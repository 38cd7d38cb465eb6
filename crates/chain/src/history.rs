use std::collections::BTreeMap;

use crate::types::Header;

/// Visitor for descending history enumeration. Return `false` to stop.
pub trait StateWalker {
    fn on_state(&mut self, state: &Header) -> bool;
}

/// Local store of verified headers, keyed by height.
///
/// `add_states` is a monotonic append: every inserted header must be
/// internally valid and link to its stored neighbours. Violating that is a
/// programmer error, not a recoverable condition.
pub trait History {
    fn get_tip(&self) -> Option<Header>;

    /// Invoke the walker in strictly descending height order, starting at
    /// `upper` (inclusive) when given, until it returns `false`.
    fn enum_states(&self, walker: &mut dyn StateWalker, upper: Option<u64>);

    fn add_states(&mut self, states: &[Header]);

    /// Truncate everything at `height` and above.
    fn delete_from(&mut self, height: u64);
}

/// In-memory `History` implementation.
#[derive(Default)]
pub struct MemoryHistory {
    states: BTreeMap<u64, Header>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, height: u64) -> Option<&Header> {
        self.states.get(&height)
    }

    fn check_links(&self, height: u64) {
        let s = &self.states[&height];
        if let Some(below) = height.checked_sub(1).and_then(|h| self.states.get(&h)) {
            assert!(
                s.prev == below.hash() && s.chainwork > below.chainwork,
                "history link broken at height {height}"
            );
        }
        if let Some(above) = self.states.get(&(height + 1)) {
            assert!(
                above.prev == s.hash() && above.chainwork > s.chainwork,
                "history link broken at height {}",
                height + 1
            );
        }
    }
}

impl History for MemoryHistory {
    fn get_tip(&self) -> Option<Header> {
        self.states.last_key_value().map(|(_, s)| s.clone())
    }

    fn enum_states(&self, walker: &mut dyn StateWalker, upper: Option<u64>) {
        let upper = upper.unwrap_or(u64::MAX);
        for (_, s) in self.states.range(..=upper).rev() {
            if !walker.on_state(s) {
                break;
            }
        }
    }

    fn add_states(&mut self, states: &[Header]) {
        for s in states {
            self.states.insert(s.height, s.clone());
        }
        for s in states {
            self.check_links(s.height);
        }
    }

    fn delete_from(&mut self, height: u64) {
        self.states.split_off(&height);
    }
}
