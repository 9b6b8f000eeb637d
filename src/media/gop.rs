//! GOP (Group of Pictures) cache for late-joiner support
//!
//! Packets are stored in groups. A group opened by a key boundary (a video
//! key frame, or any boundary on an audio-only stream) is a safe rewind
//! point; groups opened by other boundaries belong to the key group before
//! them. When a new key group would exceed the configured count, whole GOPs
//! are retired from the front until the bound holds again:
//!
//! ```text
//!  front                                                    back
//!  [K0 ..][n ..][K1 ..][K2 ..][n ..][n ..][K3 ..]   <- write
//!   \__ retired together __/
//! ```
//!
//! A new reader replays everything from the oldest retained key group, so
//! its decoder can start at once instead of waiting for the next key frame.

use std::collections::VecDeque;

/// Group count kept when none is configured
pub const DEFAULT_MAX_GROUPS: usize = 512;

/// One flush group
#[derive(Debug, Clone)]
struct Group<T> {
    key: bool,
    items: Vec<T>,
    bytes: usize,
}

/// Bounded, group-structured history of a live stream
#[derive(Debug)]
pub struct GopCache<T> {
    groups: VecDeque<Group<T>>,
    /// Key groups currently retained
    key_groups: usize,
    /// Upper bound on key groups
    max_groups: usize,
    /// Optional byte budget; the newest key group is never retired for it
    max_bytes: Option<usize>,
    bytes: usize,
    items: usize,
    enabled: bool,
}

impl<T: Clone> GopCache<T> {
    pub fn new(max_groups: usize) -> Self {
        Self {
            groups: VecDeque::new(),
            key_groups: 0,
            max_groups: max_groups.max(1),
            max_bytes: None,
            bytes: 0,
            items: 0,
            enabled: true,
        }
    }

    /// Also retire GOPs once the cached payload exceeds `max_bytes`
    pub fn with_max_bytes(mut self, max_bytes: Option<usize>) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// A disabled cache accepts nothing; readers start at the live edge
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Append an item.
    ///
    /// `boundary` closes the current group; `key` marks the new group as a
    /// rewind point. Returns `false` when the item was not cached (cache
    /// disabled, or no key group has been opened yet).
    pub fn push(&mut self, item: T, size: usize, boundary: bool, key: bool) -> bool {
        if !self.enabled {
            return false;
        }

        if boundary && key {
            self.groups.push_back(Group {
                key: true,
                items: Vec::new(),
                bytes: 0,
            });
            self.key_groups += 1;
            while self.key_groups > self.max_groups {
                self.retire_oldest_gop();
            }
        } else if boundary && !self.groups.is_empty() {
            self.groups.push_back(Group {
                key: false,
                items: Vec::new(),
                bytes: 0,
            });
        }

        let Some(group) = self.groups.back_mut() else {
            return false;
        };
        group.items.push(item);
        group.bytes += size;
        self.bytes += size;
        self.items += 1;

        if let Some(limit) = self.max_bytes {
            while self.bytes > limit && self.key_groups > 1 {
                self.retire_oldest_gop();
            }
        }
        true
    }

    /// Drop the front key group and the non-key groups that follow it
    fn retire_oldest_gop(&mut self) {
        let mut first = true;
        while let Some(front) = self.groups.front() {
            if front.key && !first {
                break;
            }
            first = false;
            if let Some(group) = self.groups.pop_front() {
                if group.key {
                    self.key_groups -= 1;
                }
                self.bytes -= group.bytes;
                self.items -= group.items.len();
            }
        }
    }

    /// Clone out every retained item, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.items);
        for group in &self.groups {
            out.extend(group.items.iter().cloned());
        }
        out
    }

    /// Visit every retained item, oldest first
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        self.groups.iter().flat_map(|g| g.items.iter()).for_each(|item| f(item));
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.key_groups = 0;
        self.bytes = 0;
        self.items = 0;
    }

    /// Number of groups (key and non-key)
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn key_group_count(&self) -> usize {
        self.key_groups
    }

    /// Number of cached items
    pub fn len(&self) -> usize {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    /// Cached payload bytes
    pub fn size(&self) -> usize {
        self.bytes
    }

    pub fn max_groups(&self) -> usize {
        self.max_groups
    }
}

impl<T: Clone> Default for GopCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_GROUPS)
    }
}
