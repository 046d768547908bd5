/// Head-end line router: relay UART in, deduplicated NDJSON out.
///
/// Each complete relay line is classified. JSON objects carrying a parseable
/// `mac` go through the dedup engine; other JSON objects (heartbeats from
/// nodes, anything without a drone identity) pass straight through. Mesh text
/// is passed through with the `[MESH] ` prefix. Timers for the stale sweep,
/// heartbeat and stats report run off `tick`.
use core::fmt::Write;

use heapless::String;

use crate::comm::{classify_line, send_message, LineKind, LineSink, MESH_PREFIX};
use crate::config::HeadConfig;
use crate::dedup::{DedupEngine, Verdict};
use crate::protocol::{
    extract_fields, format_mac, parse_mac, DroneSummary, HeadHeartbeat, HeadStats, StatsReport,
    MAX_MSG_LEN,
};

/// Longest line the bridge writes: a full relay line plus the mesh prefix.
pub const MAX_LINE_LEN: usize = MAX_MSG_LEN + 8;

/// What happened to one inbound line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Blank line
    Ignored,
    /// Detection that opened a dedup window
    Forwarded,
    /// Duplicate inside a window
    Suppressed,
    /// JSON without a usable drone identity, forwarded as is
    PassedThrough,
    /// Non-JSON mesh text, forwarded with the prefix
    Mesh,
    /// Not valid UTF-8
    Dropped,
}

pub struct Bridge<const M: usize> {
    config: HeadConfig,
    dedup: DedupEngine<M>,
    stats: HeadStats,
    last_sweep: u64,
    last_heartbeat: u64,
    last_stats: u64,
    mesh_line: String<MAX_LINE_LEN>,
}

impl<const M: usize> Bridge<M> {
    pub fn new(config: HeadConfig, now: u64) -> Self {
        Self {
            config,
            dedup: DedupEngine::new(config.dedup),
            stats: HeadStats::default(),
            last_sweep: now,
            last_heartbeat: now,
            last_stats: now,
            mesh_line: String::new(),
        }
    }

    pub fn stats(&self) -> &HeadStats {
        &self.stats
    }

    pub fn dedup(&self) -> &DedupEngine<M> {
        &self.dedup
    }

    /// Account for raw bytes read from the relay UART.
    pub fn count_bytes(&mut self, n: usize) {
        self.stats.bytes = self.stats.bytes.saturating_add(n as u32);
    }

    /// Route one relay line (without its newline) to `out`.
    pub fn handle_line<S: LineSink + ?Sized>(
        &mut self,
        line: &[u8],
        now: u64,
        out: &mut S,
    ) -> Outcome {
        let kind = classify_line(line);
        if kind == LineKind::Empty {
            return Outcome::Ignored;
        }

        let Ok(text) = core::str::from_utf8(line) else {
            log::debug!("Dropping non-UTF-8 relay line ({} bytes)", line.len());
            self.stats.non_json = self.stats.non_json.saturating_add(1);
            return Outcome::Dropped;
        };

        match kind {
            LineKind::Json => self.handle_json(text, now, out),
            _ => {
                self.stats.non_json = self.stats.non_json.saturating_add(1);
                self.mesh_line.clear();
                let _ = self.mesh_line.push_str(MESH_PREFIX);
                let _ = write!(self.mesh_line, "{}", text);
                out.write_line(&self.mesh_line);
                Outcome::Mesh
            }
        }
    }

    fn handle_json<S: LineSink + ?Sized>(&mut self, text: &str, now: u64, out: &mut S) -> Outcome {
        let fields = extract_fields(text.trim()).unwrap_or_default();
        let Some(mac) = fields.mac.and_then(parse_mac) else {
            out.write_line(text);
            self.stats.forwarded = self.stats.forwarded.saturating_add(1);
            return Outcome::PassedThrough;
        };

        self.stats.received = self.stats.received.saturating_add(1);
        match self.dedup.check(&mac, fields.node_id.unwrap_or(""), now) {
            Verdict::Suppress => {
                self.stats.suppressed = self.stats.suppressed.saturating_add(1);
                Outcome::Suppressed
            }
            Verdict::New | Verdict::NewWindow => {
                out.write_line(text);
                self.stats.forwarded = self.stats.forwarded.saturating_add(1);
                Outcome::Forwarded
            }
        }
    }

    /// Run whichever periodic jobs are due: stale sweep, heartbeat, stats.
    pub fn tick<S: LineSink + ?Sized>(&mut self, now: u64, out: &mut S) {
        if now.saturating_sub(self.last_sweep) >= self.config.dedup.sweep_interval_ms {
            let removed = self.dedup.sweep(now);
            if removed > 0 {
                log::debug!("Swept {} stale drones", removed);
            }
            self.last_sweep = now;
        }

        if now.saturating_sub(self.last_heartbeat) >= self.config.heartbeat_interval_ms {
            send_message(&HeadHeartbeat::new(self.dedup.len() as u32), out);
            self.last_heartbeat = now;
        }

        if now.saturating_sub(self.last_stats) >= self.config.stats_interval_ms {
            self.report(now, out);
            self.last_stats = now;
        }
    }

    /// Stats line followed by one summary line per tracked drone.
    pub fn report<S: LineSink + ?Sized>(&self, now: u64, out: &mut S) {
        let uptime = (now / 1000) as u32;
        send_message(
            &StatsReport::new(&self.stats, self.dedup.len() as u32, uptime),
            out,
        );
        for entry in self.dedup.iter() {
            let mac = format_mac(&entry.mac);
            let summary = DroneSummary {
                drone: &mac,
                first_node: &entry.first_node,
                suppressed: entry.suppressed,
                age_s: (now.saturating_sub(entry.last_seen) / 1000) as u32,
            };
            send_message(&summary, out);
        }
    }
}
