use dashmap::DashSet;

use super::candidate::VisitKey;

/// Keys already dispatched in this session. `mark` is an atomic test-and-set,
/// so two workers racing on the same candidate cannot both win.
#[derive(Debug, Default)]
pub struct VisitedSet {
    inner: DashSet<VisitKey>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the key was not present and is now recorded.
    pub fn mark(&self, key: VisitKey) -> bool {
        self.inner.insert(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
