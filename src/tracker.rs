/// Detection table: a small fixed arena of per-drone records.
///
/// Each drone's record is assembled from partial Open Drone ID messages that
/// arrive separately and in any order. Lookup is a linear scan; with a
/// handful of slots that beats any index. When every slot is taken, the
/// record seen least recently gives up its slot.
use heapless::Vec;

use crate::odid::{IdString, Message};
use crate::protocol::MacAddr;

/// Everything known about one drone. Fields no message has supplied yet stay
/// zero or empty.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    pub mac: MacAddr,
    pub rssi: i8,
    /// Milliseconds since boot
    pub last_seen: u64,
    pub uas_id: IdString,
    pub operator_id: IdString,
    pub drone_lat: f64,
    pub drone_long: f64,
    /// Geodetic altitude, metres
    pub altitude_msl: f32,
    /// Height above takeoff/ground, metres
    pub height_agl: f32,
    /// Horizontal speed, m/s
    pub speed: f32,
    /// Degrees clockwise from true north
    pub heading: f32,
    pub pilot_lat: f64,
    pub pilot_long: f64,
}

impl DetectionRecord {
    pub fn new(mac: MacAddr) -> Self {
        Self {
            mac,
            rssi: 0,
            last_seen: 0,
            uas_id: IdString::new(),
            operator_id: IdString::new(),
            drone_lat: 0.0,
            drone_long: 0.0,
            altitude_msl: 0.0,
            height_agl: 0.0,
            speed: 0.0,
            heading: 0.0,
            pilot_lat: 0.0,
            pilot_long: 0.0,
        }
    }

    /// Overwrite only the fields this message kind carries.
    pub fn apply(&mut self, msg: &Message) {
        match msg {
            Message::BasicId(b) => self.uas_id = b.uas_id.clone(),
            Message::Location(loc) => {
                self.drone_lat = loc.latitude;
                self.drone_long = loc.longitude;
                self.altitude_msl = loc.altitude_geo;
                self.height_agl = loc.height;
                self.speed = loc.speed_horizontal;
                self.heading = loc.direction;
            }
            Message::System(sys) => {
                self.pilot_lat = sys.operator_latitude;
                self.pilot_long = sys.operator_longitude;
            }
            Message::OperatorId(op) => self.operator_id = op.operator_id.clone(),
        }
    }
}

/// Handle to an occupied slot. Only valid until the next eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(usize);

#[derive(Debug, Clone)]
struct Slot {
    record: DetectionRecord,
    dirty: bool,
}

/// Fixed-capacity table of at most `N` drones, never two slots per MAC.
pub struct DetectionTable<const N: usize> {
    slots: Vec<Slot, N>,
}

impl<const N: usize> Default for DetectionTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> DetectionTable<N> {
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn find(&self, mac: &MacAddr) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|s| s.record.mac == *mac)
            .map(SlotId)
    }

    /// Slot for `mac`: existing entry, else a free slot, else the slot of the
    /// least recently seen drone, reset for the newcomer. `None` only for a
    /// zero-capacity table.
    pub fn lookup_or_create(&mut self, mac: &MacAddr, now: u64) -> Option<SlotId> {
        if let Some(id) = self.find(mac) {
            return Some(id);
        }

        let mut record = DetectionRecord::new(*mac);
        record.last_seen = now;
        let slot = Slot {
            record,
            dirty: false,
        };

        match self.slots.push(slot) {
            Ok(()) => Some(SlotId(self.slots.len() - 1)),
            Err(slot) => {
                let id = self.evict_oldest()?;
                self.slots[id.0] = slot;
                Some(id)
            }
        }
    }

    /// Clear the least recently seen entry and return its slot. The slot
    /// stays allocated; the caller refills it.
    pub fn evict_oldest(&mut self) -> Option<SlotId> {
        let idx = self
            .slots
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.record.last_seen)
            .map(|(i, _)| i)?;
        let slot = &mut self.slots[idx];
        slot.record = DetectionRecord::new([0; 6]);
        slot.dirty = false;
        Some(SlotId(idx))
    }

    /// Fold one decoded message into a record. `None` still refreshes signal
    /// strength and last-seen (a sighting whose message kind we don't use).
    pub fn merge(&mut self, id: SlotId, msg: Option<&Message>, rssi: i8, now: u64) {
        let Some(slot) = self.slots.get_mut(id.0) else {
            return;
        };
        if let Some(msg) = msg {
            slot.record.apply(msg);
        }
        slot.record.rssi = rssi;
        slot.record.last_seen = now;
        slot.dirty = true;
    }

    pub fn get(&self, id: SlotId) -> Option<&DetectionRecord> {
        self.slots.get(id.0).map(|s| &s.record)
    }

    pub fn is_dirty(&self, id: SlotId) -> bool {
        self.slots.get(id.0).is_some_and(|s| s.dirty)
    }

    /// Copy a record out for emission and clear its dirty flag.
    pub fn snapshot(&mut self, id: SlotId) -> Option<DetectionRecord> {
        let slot = self.slots.get_mut(id.0)?;
        slot.dirty = false;
        Some(slot.record.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectionRecord> {
        self.slots.iter().map(|s| &s.record)
    }

    /// Drones seen within `window_ms` of `now`.
    pub fn active_count(&self, now: u64, window_ms: u64) -> usize {
        self.iter()
            .filter(|r| now.saturating_sub(r.last_seen) < window_ms)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odid::{decode_message, encode};

    fn mac(n: u8) -> MacAddr {
        [0x60, 0x60, 0x1F, 0x00, 0x00, n]
    }

    fn msg(raw: [u8; 25]) -> Message {
        decode_message(&raw).unwrap()
    }

    // ── Lookup and eviction ─────────────────────────────────────────

    #[test]
    fn lookup_returns_same_slot_for_same_mac() {
        let mut t = DetectionTable::<4>::new();
        let a = t.lookup_or_create(&mac(1), 0).unwrap();
        let b = t.lookup_or_create(&mac(1), 10).unwrap();
        assert_eq!(a, b);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn fills_free_slots_first() {
        let mut t = DetectionTable::<4>::new();
        for i in 0..4 {
            t.lookup_or_create(&mac(i), i as u64).unwrap();
        }
        assert_eq!(t.len(), 4);
        for i in 0..4 {
            assert!(t.find(&mac(i)).is_some());
        }
    }

    #[test]
    fn overflow_evicts_exactly_the_oldest() {
        let mut t = DetectionTable::<3>::new();
        let times = [500u64, 100, 300];
        for (i, &ts) in times.iter().enumerate() {
            let id = t.lookup_or_create(&mac(i as u8), ts).unwrap();
            t.merge(id, None, -50, ts);
        }

        t.lookup_or_create(&mac(9), 600).unwrap();

        assert_eq!(t.len(), 3);
        assert!(t.find(&mac(1)).is_none(), "oldest (t=100) evicted");
        assert!(t.find(&mac(0)).is_some());
        assert!(t.find(&mac(2)).is_some());
        assert!(t.find(&mac(9)).is_some());
    }

    #[test]
    fn reused_slot_starts_empty() {
        let mut t = DetectionTable::<1>::new();
        let id = t.lookup_or_create(&mac(1), 0).unwrap();
        t.merge(id, Some(&msg(encode::basic_id("OLD"))), -40, 0);

        let id = t.lookup_or_create(&mac(2), 5).unwrap();
        let r = t.get(id).unwrap();
        assert_eq!(r.mac, mac(2));
        assert!(r.uas_id.is_empty());
        assert!(!t.is_dirty(id));
    }

    #[test]
    fn no_duplicates_under_churn() {
        let mut t = DetectionTable::<4>::new();
        for round in 0..50u64 {
            let m = mac((round % 7) as u8);
            let id = t.lookup_or_create(&m, round).unwrap();
            t.merge(id, None, -60, round);
        }
        let mut seen: heapless::Vec<MacAddr, 4> = heapless::Vec::new();
        for r in t.iter() {
            assert!(!seen.contains(&r.mac));
            let _ = seen.push(r.mac);
        }
        assert_eq!(seen.len(), 4);
    }

    // ── Merging ─────────────────────────────────────────────────────

    #[test]
    fn merge_keeps_fields_from_other_kinds() {
        let mut t = DetectionTable::<2>::new();
        let id = t.lookup_or_create(&mac(1), 0).unwrap();

        t.merge(id, Some(&msg(encode::basic_id("SERIAL-1"))), -70, 10);
        t.merge(id, Some(&msg(encode::location(47.5, 8.5, 420.0))), -65, 20);
        t.merge(id, Some(&msg(encode::system(47.4, 8.4))), -60, 30);
        t.merge(id, Some(&msg(encode::operator_id("OP-CH-1"))), -55, 40);
        t.merge(id, None, -50, 50);

        let r = t.get(id).unwrap();
        assert_eq!(r.uas_id.as_str(), "SERIAL-1");
        assert!((r.drone_lat - 47.5).abs() < 1e-6);
        assert!((r.drone_long - 8.5).abs() < 1e-6);
        assert!((r.altitude_msl - 420.0).abs() < 0.5);
        assert!((r.pilot_lat - 47.4).abs() < 1e-6);
        assert!((r.pilot_long - 8.4).abs() < 1e-6);
        assert_eq!(r.operator_id.as_str(), "OP-CH-1");
        assert_eq!(r.rssi, -50);
        assert_eq!(r.last_seen, 50);
    }

    #[test]
    fn merge_order_does_not_matter() {
        let parts = [
            msg(encode::basic_id("ORDER")),
            msg(encode::location(1.5, 2.5, 30.0)),
            msg(encode::system(1.4, 2.4)),
        ];
        let mut forward = DetectionTable::<1>::new();
        let mut reverse = DetectionTable::<1>::new();
        let f = forward.lookup_or_create(&mac(1), 0).unwrap();
        let r = reverse.lookup_or_create(&mac(1), 0).unwrap();
        for p in parts.iter() {
            forward.merge(f, Some(p), -60, 1);
        }
        for p in parts.iter().rev() {
            reverse.merge(r, Some(p), -60, 1);
        }
        assert_eq!(forward.get(f), reverse.get(r));
    }

    #[test]
    fn later_location_replaces_earlier() {
        let mut t = DetectionTable::<1>::new();
        let id = t.lookup_or_create(&mac(1), 0).unwrap();
        t.merge(id, Some(&msg(encode::location(1.0, 1.0, 10.0))), -60, 1);
        t.merge(id, Some(&msg(encode::location(2.0, 2.0, 20.0))), -60, 2);
        let r = t.get(id).unwrap();
        assert!((r.drone_lat - 2.0).abs() < 1e-6);
    }

    #[test]
    fn snapshot_clears_dirty() {
        let mut t = DetectionTable::<1>::new();
        let id = t.lookup_or_create(&mac(1), 0).unwrap();
        t.merge(id, None, -60, 1);
        assert!(t.is_dirty(id));
        let snap = t.snapshot(id).unwrap();
        assert_eq!(snap.rssi, -60);
        assert!(!t.is_dirty(id));
    }

    #[test]
    fn active_count_uses_window() {
        let mut t = DetectionTable::<4>::new();
        for (i, ts) in [0u64, 50_000, 100_000].iter().enumerate() {
            let id = t.lookup_or_create(&mac(i as u8), *ts).unwrap();
            t.merge(id, None, -60, *ts);
        }
        assert_eq!(t.active_count(130_000, 120_000), 2);
        assert_eq!(t.active_count(300_000, 120_000), 0);
    }
}
