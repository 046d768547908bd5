/// Detection pipeline shared by the radio listeners and the emitter.
///
/// Listeners call [`Pipeline::ingest`] from driver callbacks (the Wi-Fi
/// sniffer runs in interrupt context). It holds the table lock only for the
/// lookup, merge and snapshot, then hands the snapshot to a bounded queue
/// with `try_send`. A full queue drops the snapshot; the table keeps the
/// current state and the next sighting queues it again.
///
/// A single consumer drains the queue in FIFO order, so output lines are never
/// interleaved.
use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;

use crate::odid;
use crate::scanner::{OdidPayload, Sighting};
use crate::tracker::{DetectionRecord, DetectionTable, SlotId};

/// Table of `N` drones plus a hand-off queue of depth `Q`.
pub struct Pipeline<M: RawMutex, const N: usize, const Q: usize> {
    table: Mutex<M, RefCell<DetectionTable<N>>>,
    queue: Channel<M, DetectionRecord, Q>,
    queued: AtomicU32,
    dropped: AtomicU32,
}

impl<M: RawMutex, const N: usize, const Q: usize> Default for Pipeline<M, N, Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const N: usize, const Q: usize> Pipeline<M, N, Q> {
    pub const fn new() -> Self {
        Self {
            table: Mutex::new(RefCell::new(DetectionTable::new())),
            queue: Channel::new(),
            queued: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    /// Merge a sighting into the table and queue a snapshot of the result.
    /// Returns `false` if the snapshot was dropped. Never blocks.
    pub fn ingest(&self, sighting: &Sighting<'_>) -> bool {
        let snapshot = self.table.lock(|cell| {
            let mut table = cell.borrow_mut();
            let id = table.lookup_or_create(&sighting.mac, sighting.timestamp)?;
            fold(&mut table, id, sighting);
            table.snapshot(id)
        });

        let Some(record) = snapshot else {
            return false;
        };
        match self.queue.try_send(record) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Wait for the next snapshot.
    pub async fn next(&self) -> DetectionRecord {
        self.queue.receive().await
    }

    pub fn try_next(&self) -> Option<DetectionRecord> {
        self.queue.try_receive().ok()
    }

    /// Drones seen within `window_ms`.
    pub fn tracked(&self, now: u64, window_ms: u64) -> usize {
        self.table.lock(|cell| cell.borrow().active_count(now, window_ms))
    }

    pub fn queued(&self) -> u32 {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Apply every usable message in a sighting, then refresh signal and time.
fn fold<const N: usize>(table: &mut DetectionTable<N>, id: SlotId, sighting: &Sighting<'_>) {
    let (rssi, now) = (sighting.rssi, sighting.timestamp);
    match sighting.payload {
        OdidPayload::Message(raw) => {
            let msg = odid::decode_message(raw);
            table.merge(id, msg.as_ref(), rssi, now);
        }
        OdidPayload::Pack(pack) => {
            for msg in pack.messages() {
                table.merge(id, Some(&msg), rssi, now);
            }
            table.merge(id, None, rssi, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odid::{encode, MessagePack};
    use crate::scanner::Transport;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    type TestPipeline = Pipeline<CriticalSectionRawMutex, 2, 4>;

    const DRONE_A: [u8; 6] = [0xAA, 0, 0, 0, 0, 1];
    const DRONE_B: [u8; 6] = [0xBB, 0, 0, 0, 0, 2];

    fn single<'a>(mac: [u8; 6], raw: &'a [u8; 25], ts: u64) -> Sighting<'a> {
        Sighting {
            mac,
            rssi: -60,
            timestamp: ts,
            transport: Transport::Ble,
            payload: OdidPayload::Message(raw),
        }
    }

    #[test]
    fn ingest_queues_merged_snapshot() {
        let p = TestPipeline::new();
        let id = encode::basic_id("PIPE-1");
        let loc = encode::location(10.0, 20.0, 100.0);

        assert!(p.ingest(&single(DRONE_A, &id, 1)));
        assert!(p.ingest(&single(DRONE_A, &loc, 2)));

        let first = p.try_next().unwrap();
        assert_eq!(first.uas_id.as_str(), "PIPE-1");
        assert_eq!(first.drone_lat, 0.0);

        let second = p.try_next().unwrap();
        assert_eq!(second.uas_id.as_str(), "PIPE-1");
        assert!((second.drone_lat - 10.0).abs() < 1e-6);
        assert!(p.try_next().is_none());
    }

    #[test]
    fn fifo_across_drones() {
        let p = TestPipeline::new();
        let a = encode::basic_id("A");
        let b = encode::basic_id("B");
        p.ingest(&single(DRONE_A, &a, 1));
        p.ingest(&single(DRONE_B, &b, 2));
        p.ingest(&single(DRONE_A, &a, 3));
        assert_eq!(p.try_next().unwrap().mac, DRONE_A);
        assert_eq!(p.try_next().unwrap().mac, DRONE_B);
        assert_eq!(p.try_next().unwrap().last_seen, 3);
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let p = TestPipeline::new();
        let raw = encode::basic_id("FLOOD");
        for ts in 0..4 {
            assert!(p.ingest(&single(DRONE_A, &raw, ts)));
        }
        assert!(!p.ingest(&single(DRONE_A, &raw, 4)));
        assert_eq!(p.queued(), 4);
        assert_eq!(p.dropped(), 1);

        // Table still reflects the dropped sighting
        assert_eq!(p.tracked(4, 1000), 1);
        for _ in 0..4 {
            p.try_next().unwrap();
        }
        assert!(p.ingest(&single(DRONE_A, &raw, 5)));
        assert_eq!(p.try_next().unwrap().last_seen, 5);
    }

    #[test]
    fn pack_sighting_merges_every_message() {
        let p = TestPipeline::new();
        let buf = encode::pack(&[
            encode::basic_id("PACKED"),
            encode::location(3.0, 4.0, 50.0),
            encode::system(3.1, 4.1),
        ]);
        let pack = MessagePack::parse(&buf).unwrap();
        let s = Sighting {
            mac: DRONE_B,
            rssi: -72,
            timestamp: 9,
            transport: Transport::WiFiNan,
            payload: OdidPayload::Pack(pack),
        };
        assert!(p.ingest(&s));
        let r = p.try_next().unwrap();
        assert_eq!(r.uas_id.as_str(), "PACKED");
        assert!((r.drone_long - 4.0).abs() < 1e-6);
        assert!((r.pilot_lat - 3.1).abs() < 1e-6);
        assert_eq!(r.rssi, -72);
    }

    #[test]
    fn unused_kind_still_refreshes() {
        let p = TestPipeline::new();
        let mut self_id = [0u8; 25];
        self_id[0] = 0x32; // Self-ID, not decoded
        assert!(p.ingest(&single(DRONE_A, &self_id, 77)));
        let r = p.try_next().unwrap();
        assert_eq!(r.last_seen, 77);
        assert!(r.uas_id.is_empty());
    }

    #[test]
    fn concurrent_producers() {
        use std::sync::Arc;
        use std::thread;

        let p: Arc<Pipeline<CriticalSectionRawMutex, 8, 64>> = Arc::new(Pipeline::new());
        let mut handles = std::vec::Vec::new();
        for n in 0..2u8 {
            let p = p.clone();
            handles.push(thread::spawn(move || {
                let raw = encode::basic_id("T");
                for ts in 0..20u64 {
                    let s = Sighting {
                        mac: [n, 0, 0, 0, 0, 0],
                        rssi: -50,
                        timestamp: ts,
                        transport: Transport::Ble,
                        payload: OdidPayload::Message(&raw),
                    };
                    p.ingest(&s);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(p.queued() + p.dropped(), 40);
        assert_eq!(p.tracked(20, 1000), 2);
    }
}
