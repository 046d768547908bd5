/// Wi-Fi channel-hop plan.
///
/// Drone ID beacons and NAN frames can sit on any channel, so the sniffer
/// dwells briefly on each in turn. Dual-band parts alternate between the
/// 2.4 GHz and 5 GHz lists, stepping round-robin within each band.

/// 2.4 GHz channels, common Remote ID channels first.
pub const CHANNELS_2G4: &[u8] = &[1, 6, 11, 2, 3, 4, 5, 7, 8, 9, 10, 12, 13];

/// 5 GHz channels (UNII-1 through UNII-3).
pub const CHANNELS_5G: &[u8] = &[
    36, 40, 44, 48, 52, 56, 60, 64, 100, 104, 108, 112, 116, 120, 124, 128, 132, 136, 140, 144,
    149, 153, 157, 161, 165,
];

/// Default dwell time per channel in milliseconds.
///
/// Dual-band full sweep: 25 × 5 GHz channels interleaved with 2.4 GHz ≈ 5 s.
pub const DEFAULT_DWELL_MS: u64 = 100;

/// Round-robin channel sequence.
#[derive(Debug, Clone)]
pub struct ChannelHopper {
    dual_band: bool,
    next_5g: bool,
    idx_2g4: usize,
    idx_5g: usize,
}

impl ChannelHopper {
    pub const fn new(dual_band: bool) -> Self {
        Self {
            dual_band,
            next_5g: false,
            idx_2g4: 0,
            idx_5g: 0,
        }
    }

    /// The channel to tune to for the next dwell period.
    pub fn next_channel(&mut self) -> u8 {
        if self.dual_band && self.next_5g {
            let ch = CHANNELS_5G[self.idx_5g];
            self.idx_5g = (self.idx_5g + 1) % CHANNELS_5G.len();
            self.next_5g = false;
            ch
        } else {
            let ch = CHANNELS_2G4[self.idx_2g4];
            self.idx_2g4 = (self.idx_2g4 + 1) % CHANNELS_2G4.len();
            self.next_5g = self.dual_band;
            ch
        }
    }
}

impl Iterator for ChannelHopper {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        Some(self.next_channel())
    }
}
