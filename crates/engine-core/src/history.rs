pub const MAX_SNAPSHOTS: usize = 100;

/// Rolling, bounded snapshot log at command granularity. Invariant: when
/// non-empty, `snapshots[index]` equals the serialized current content, so
/// undo moves the index back one slot and restores that snapshot.
#[derive(Debug, Default)]
pub struct SnapshotHistory {
    snapshots: Vec<String>,
    index: usize,
}

impl SnapshotHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self, snapshot: String) {
        self.snapshots.clear();
        self.snapshots.push(snapshot);
        self.index = 0;
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        !self.snapshots.is_empty() && self.index + 1 < self.snapshots.len()
    }

    /// Record one committed mutation. Truncates any stale redo branch,
    /// seeds the log with the pre-mutation snapshot when it is empty or
    /// has diverged, then appends the post-mutation snapshot. No-op
    /// mutations are deduplicated. Evicts the oldest entry past capacity,
    /// adjusting the read index.
    pub fn commit(&mut self, before: String, after: String) {
        if self.snapshots.is_empty() {
            self.snapshots.push(before);
            self.index = 0;
        } else {
            self.snapshots.truncate(self.index + 1);
            if self.snapshots[self.index] != before {
                self.snapshots.push(before);
                self.index += 1;
            }
        }

        if self.snapshots[self.index] != after {
            self.snapshots.push(after);
            self.index += 1;
        }

        while self.snapshots.len() > MAX_SNAPSHOTS {
            self.snapshots.remove(0);
            self.index = self.index.saturating_sub(1);
        }
    }

    pub fn undo(&mut self) -> Option<&str> {
        if !self.can_undo() {
            return None;
        }
        self.index -= 1;
        Some(&self.snapshots[self.index])
    }

    pub fn redo(&mut self) -> Option<&str> {
        if !self.can_redo() {
            return None;
        }
        self.index += 1;
        Some(&self.snapshots[self.index])
    }
}
