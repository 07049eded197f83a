use dashmap::DashMap;

/// Equality and hashing cover both fields: a temporary and a persistent breakpoint at the same
/// address are distinct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Breakpoint {
    pub address: u16,
    pub is_temporary: bool,
}

impl Breakpoint {
    pub fn persistent(address: u16) -> Self {
        Breakpoint {
            address,
            is_temporary: false,
        }
    }

    pub fn temporary(address: u16) -> Self {
        Breakpoint {
            address,
            is_temporary: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakpointState {
    Enabled,
    Disabled,
    Unknown,
}

/// Address to enabled-flag maps, one per kind, so temporaries can be cleared in bulk.
#[derive(Debug, Default)]
pub struct Breakpoints {
    persistent: DashMap<u16, bool>,
    temporary: DashMap<u16, bool>,
}

impl Breakpoints {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, is_temporary: bool) -> &DashMap<u16, bool> {
        if is_temporary {
            &self.temporary
        } else {
            &self.persistent
        }
    }

    /// Insert or overwrite.
    pub fn add(&self, breakpoint: Breakpoint, enabled: bool) {
        self.map(breakpoint.is_temporary)
            .insert(breakpoint.address, enabled);
    }

    /// Returns whether the breakpoint existed.
    pub fn remove(&self, breakpoint: Breakpoint) -> bool {
        self.map(breakpoint.is_temporary)
            .remove(&breakpoint.address)
            .is_some()
    }

    /// Flip the enabled flag of an existing breakpoint. Unknown breakpoints are left alone.
    pub fn set_enabled(&self, breakpoint: Breakpoint, enabled: bool) {
        if let Some(mut entry) = self.map(breakpoint.is_temporary).get_mut(&breakpoint.address) {
            *entry = enabled;
        }
    }

    pub fn state(&self, breakpoint: Breakpoint) -> BreakpointState {
        match self.map(breakpoint.is_temporary).get(&breakpoint.address) {
            Some(entry) if *entry => BreakpointState::Enabled,
            Some(_) => BreakpointState::Disabled,
            None => BreakpointState::Unknown,
        }
    }

    pub fn contains(&self, breakpoint: Breakpoint) -> bool {
        self.state(breakpoint) != BreakpointState::Unknown
    }

    /// Enabled breakpoint at `address`, preferring the temporary one.
    pub fn enabled_at(&self, address: u16) -> Option<Breakpoint> {
        [Breakpoint::temporary(address), Breakpoint::persistent(address)]
            .into_iter()
            .find(|breakpoint| self.state(*breakpoint) == BreakpointState::Enabled)
    }

    pub fn clear_temporary(&self) {
        self.temporary.clear();
    }

    pub fn len(&self) -> usize {
        self.persistent.len() + self.temporary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every breakpoint with its enabled flag, sorted by address.
    pub fn snapshot(&self) -> Vec<(Breakpoint, bool)> {
        let mut all: Vec<_> = self
            .persistent
            .iter()
            .map(|entry| (Breakpoint::persistent(*entry.key()), *entry.value()))
            .chain(
                self.temporary
                    .iter()
                    .map(|entry| (Breakpoint::temporary(*entry.key()), *entry.value())),
            )
            .collect();
        all.sort();
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tri_state_lookup() {
        let breakpoints = Breakpoints::new();
        let bp = Breakpoint::persistent(0x204);
        assert_eq!(breakpoints.state(bp), BreakpointState::Unknown);
        breakpoints.add(bp, true);
        assert_eq!(breakpoints.state(bp), BreakpointState::Enabled);
        breakpoints.set_enabled(bp, false);
        assert_eq!(breakpoints.state(bp), BreakpointState::Disabled);
        assert!(breakpoints.contains(bp));
        assert_eq!(
            breakpoints.state(Breakpoint::temporary(0x204)),
            BreakpointState::Unknown
        );
    }

    #[test]
    fn add_and_remove_are_idempotent() {
        let breakpoints = Breakpoints::new();
        let bp = Breakpoint::temporary(0x300);
        breakpoints.add(bp, true);
        breakpoints.add(bp, true);
        assert_eq!(breakpoints.len(), 1);
        assert!(breakpoints.remove(bp));
        assert!(!breakpoints.remove(bp));
        breakpoints.set_enabled(bp, true);
        assert!(breakpoints.is_empty());
    }

    #[test]
    fn clears_only_temporary() {
        let breakpoints = Breakpoints::new();
        breakpoints.add(Breakpoint::persistent(0x200), true);
        breakpoints.add(Breakpoint::temporary(0x202), true);
        breakpoints.add(Breakpoint::temporary(0x200), false);
        assert_eq!(breakpoints.enabled_at(0x200), Some(Breakpoint::persistent(0x200)));
        breakpoints.clear_temporary();
        assert_eq!(
            breakpoints.snapshot(),
            vec![(Breakpoint::persistent(0x200), true)]
        );
        assert_eq!(breakpoints.enabled_at(0x202), None);
    }
}
