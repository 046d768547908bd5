/// Head-end deduplication of multi-sensor reports.
///
/// Several nodes usually hear the same drone broadcast. The first report of a
/// drone opens a window; every report of that drone inside the window is
/// suppressed, whichever node it came from. The first report after the window
/// closes opens the next one. Position belongs to the drone, not to the
/// sensor, so there is nothing to gain from comparing sensors within a window.
///
/// Entries idle for longer than the stale timeout are swept away, so a drone
/// that returns later is reported immediately.
use heapless::Vec;

use crate::protocol::{MacAddr, TagString};

/// Dedup timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupConfig {
    /// Reports within this long of the window start are duplicates
    pub window_ms: u64,
    /// Entries with no report for longer than this are removed by `sweep`
    pub stale_ms: u64,
    /// How often the owner should call `sweep`
    pub sweep_interval_ms: u64,
}

impl DedupConfig {
    pub const fn new() -> Self {
        Self {
            window_ms: 500,
            stale_ms: 30_000,
            sweep_interval_ms: 10_000,
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Dedup state for one drone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    pub mac: MacAddr,
    pub window_start: u64,
    pub last_seen: u64,
    /// Node whose report opened the current window
    pub first_node: TagString,
    /// Reports suppressed in the current window
    pub suppressed: u32,
}

/// What to do with a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// First report of an unknown (or swept) drone
    New,
    /// First report after the previous window closed
    NewWindow,
    /// Inside the current window
    Suppress,
}

impl Verdict {
    pub fn forward(self) -> bool {
        !matches!(self, Verdict::Suppress)
    }
}

/// Dedup table for at most `M` drones.
pub struct DedupEngine<const M: usize> {
    config: DedupConfig,
    entries: Vec<DedupEntry, M>,
}

impl<const M: usize> DedupEngine<M> {
    pub const fn new(config: DedupConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
        }
    }

    /// Decide whether a report of `mac` from `node` at `now` goes through.
    pub fn check(&mut self, mac: &MacAddr, node: &str, now: u64) -> Verdict {
        let window_ms = self.config.window_ms;

        if let Some(entry) = self.entries.iter_mut().find(|e| e.mac == *mac) {
            entry.last_seen = now;
            if now.saturating_sub(entry.window_start) >= window_ms {
                entry.window_start = now;
                entry.suppressed = 0;
                entry.first_node = tag_string(node);
                return Verdict::NewWindow;
            }
            entry.suppressed = entry.suppressed.saturating_add(1);
            return Verdict::Suppress;
        }

        let entry = DedupEntry {
            mac: *mac,
            window_start: now,
            last_seen: now,
            first_node: tag_string(node),
            suppressed: 0,
        };
        if let Err(entry) = self.entries.push(entry) {
            // Table full: the drone heard from least recently makes room
            if let Some(oldest) = self.entries.iter_mut().min_by_key(|e| e.last_seen) {
                log::debug!("Dedup table full, evicting {:02x?}", oldest.mac);
                *oldest = entry;
            }
        }
        Verdict::New
    }

    /// Remove entries idle for longer than the stale timeout. Returns how
    /// many were removed.
    pub fn sweep(&mut self, now: u64) -> usize {
        let stale_ms = self.config.stale_ms;
        let before = self.entries.len();
        self.entries.retain(|e| {
            let idle = now.saturating_sub(e.last_seen);
            if idle > stale_ms {
                log::info!(
                    "Cleared stale drone {:02x?} (no activity {}s)",
                    e.mac,
                    idle / 1000
                );
                false
            } else {
                true
            }
        });
        before - self.entries.len()
    }

    pub fn get(&self, mac: &MacAddr) -> Option<&DedupEntry> {
        self.entries.iter().find(|e| e.mac == *mac)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DedupEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Copy a node id into a tag, truncating at capacity.
fn tag_string(node: &str) -> TagString {
    let mut tag = TagString::new();
    for c in node.chars() {
        if tag.push(c).is_err() {
            break;
        }
    }
    tag
}
