/// Open Drone ID (ASTM F3411 / ASD-STAN prEN 4709-002) message decoder.
///
/// Every message is 25 bytes. The top nibble of the first byte is the message
/// type, the low nibble the protocol version. Only the four kinds that feed a
/// detection record are decoded; everything else is ignored.
///
/// Single messages are taken as `&[u8; MESSAGE_SIZE]`, so a short buffer can
/// only reach the decoder through a checked conversion at the call site.
use heapless::String;

use crate::reader::Reader;

/// Encoded size of every Open Drone ID message.
pub const MESSAGE_SIZE: usize = 25;

/// Length of the UAS ID and operator ID fields.
pub const ID_SIZE: usize = 20;

/// Maximum number of messages in a message pack.
pub const MAX_PACK_MESSAGES: usize = 9;

/// Message pack header: type byte, single message size, message count.
pub const PACK_HEADER_SIZE: usize = 3;

/// ID string type (UAS ID, operator ID).
pub type IdString = String<ID_SIZE>;

/// Message type (top nibble of byte 0).
pub mod message_type {
    pub const BASIC_ID: u8 = 0x0;
    pub const LOCATION: u8 = 0x1;
    pub const AUTH: u8 = 0x2;
    pub const SELF_ID: u8 = 0x3;
    pub const SYSTEM: u8 = 0x4;
    pub const OPERATOR_ID: u8 = 0x5;
    pub const MESSAGE_PACK: u8 = 0xF;
}

/// Latitude/longitude scale: degrees × 10^7 on the wire.
const LATLON_MULT: f64 = 10_000_000.0;

/// Altitudes and height: (metres + 1000) × 2 on the wire.
const ALT_DIV: f32 = 0.5;
const ALT_ADDER: f32 = 1000.0;

/// Horizontal speed scale factors (m/s).
const SPEED_DIV_LOW: f32 = 0.25;
const SPEED_DIV_HIGH: f32 = 0.75;

/// Vertical speed scale (m/s).
const VSPEED_DIV: f32 = 0.5;

/// Message type of an encoded message header byte.
#[inline]
pub fn message_type(header: u8) -> u8 {
    header >> 4
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicId {
    pub id_type: u8,
    pub ua_type: u8,
    pub uas_id: IdString,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub status: u8,
    /// Track direction, degrees clockwise from true north
    pub direction: f32,
    pub speed_horizontal: f32,
    pub speed_vertical: f32,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_baro: f32,
    pub altitude_geo: f32,
    /// Height above takeoff or ground, depending on `height_type`
    pub height: f32,
    pub height_type: u8,
    /// Tenths of a second since the start of the hour
    pub timestamp: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct System {
    pub operator_location_type: u8,
    pub operator_latitude: f64,
    pub operator_longitude: f64,
    pub area_count: u16,
    /// Metres
    pub area_radius: u16,
    pub area_ceiling: f32,
    pub area_floor: f32,
    pub operator_altitude_geo: f32,
    /// Seconds since 2019-01-01 00:00 UTC
    pub timestamp: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorId {
    pub id_type: u8,
    pub operator_id: IdString,
}

/// A decoded message of one of the four kinds a detection record uses.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    BasicId(BasicId),
    Location(Location),
    System(System),
    OperatorId(OperatorId),
}

/// Decode a single 25-byte message. Returns `None` for kinds we don't use
/// (authentication, self-ID, nested packs, reserved values).
pub fn decode_message(msg: &[u8; MESSAGE_SIZE]) -> Option<Message> {
    let mut r = Reader::new(msg);
    let header = r.u8()?;
    match message_type(header) {
        message_type::BASIC_ID => decode_basic_id(&mut r).map(Message::BasicId),
        message_type::LOCATION => decode_location(&mut r).map(Message::Location),
        message_type::SYSTEM => decode_system(&mut r).map(Message::System),
        message_type::OPERATOR_ID => decode_operator_id(&mut r).map(Message::OperatorId),
        _ => None,
    }
}

fn decode_basic_id(r: &mut Reader<'_>) -> Option<BasicId> {
    let types = r.u8()?;
    let id = r.array::<ID_SIZE>()?;
    Some(BasicId {
        id_type: types >> 4,
        ua_type: types & 0x0F,
        uas_id: decode_id_string(id),
    })
}

fn decode_location(r: &mut Reader<'_>) -> Option<Location> {
    // bit 0: speed multiplier, bit 1: east/west direction segment,
    // bit 2: height type, bits 4-7: operational status
    let flags = r.u8()?;
    let direction = r.u8()?;
    let speed_h = r.u8()?;
    let speed_v = r.i8()?;
    let lat = r.i32_le()?;
    let lon = r.i32_le()?;
    let alt_baro = r.u16_le()?;
    let alt_geo = r.u16_le()?;
    let height = r.u16_le()?;
    let _accuracy = r.bytes(2)?;
    let timestamp = r.u16_le()?;

    Some(Location {
        status: flags >> 4,
        direction: decode_direction(direction, flags & 0x02 != 0),
        speed_horizontal: decode_speed_horizontal(speed_h, flags & 0x01 != 0),
        speed_vertical: speed_v as f32 * VSPEED_DIV,
        latitude: decode_lat_lon(lat),
        longitude: decode_lat_lon(lon),
        altitude_baro: decode_altitude(alt_baro),
        altitude_geo: decode_altitude(alt_geo),
        height: decode_altitude(height),
        height_type: (flags >> 2) & 0x01,
        timestamp,
    })
}

fn decode_system(r: &mut Reader<'_>) -> Option<System> {
    let flags = r.u8()?;
    let lat = r.i32_le()?;
    let lon = r.i32_le()?;
    let area_count = r.u16_le()?;
    let area_radius = r.u8()?;
    let area_ceiling = r.u16_le()?;
    let area_floor = r.u16_le()?;
    let _class = r.u8()?;
    let operator_alt = r.u16_le()?;
    let timestamp = r.u32_le()?;

    Some(System {
        operator_location_type: flags & 0x03,
        operator_latitude: decode_lat_lon(lat),
        operator_longitude: decode_lat_lon(lon),
        area_count,
        area_radius: area_radius as u16 * 10,
        area_ceiling: decode_altitude(area_ceiling),
        area_floor: decode_altitude(area_floor),
        operator_altitude_geo: decode_altitude(operator_alt),
        timestamp,
    })
}

fn decode_operator_id(r: &mut Reader<'_>) -> Option<OperatorId> {
    let id_type = r.u8()?;
    let id = r.array::<ID_SIZE>()?;
    Some(OperatorId {
        id_type,
        operator_id: decode_id_string(id),
    })
}

#[inline]
fn decode_lat_lon(raw: i32) -> f64 {
    raw as f64 / LATLON_MULT
}

#[inline]
fn decode_altitude(raw: u16) -> f32 {
    raw as f32 * ALT_DIV - ALT_ADDER
}

#[inline]
fn decode_direction(raw: u8, west: bool) -> f32 {
    if west {
        raw as f32 + 180.0
    } else {
        raw as f32
    }
}

#[inline]
fn decode_speed_horizontal(raw: u8, high_range: bool) -> f32 {
    if high_range {
        raw as f32 * SPEED_DIV_HIGH + 255.0 * SPEED_DIV_LOW
    } else {
        raw as f32 * SPEED_DIV_LOW
    }
}

/// NUL-padded ASCII field to string. Stops at the first NUL and drops
/// anything that isn't printable ASCII.
fn decode_id_string(raw: &[u8; ID_SIZE]) -> IdString {
    let mut out = IdString::new();
    for &b in raw.iter().take_while(|&&b| b != 0) {
        if b.is_ascii_graphic() || b == b' ' {
            let _ = out.push(b as char);
        }
    }
    out
}

// ── Message packs ──────────────────────────────────────────────────────

/// A validated message pack: header checked, every message in bounds.
#[derive(Debug, Clone, Copy)]
pub struct MessagePack<'a> {
    messages: &'a [u8],
}

impl<'a> MessagePack<'a> {
    /// Validate a message pack at the start of `buf`. Trailing bytes after the
    /// last message are ignored.
    pub fn parse(buf: &'a [u8]) -> Option<Self> {
        let mut r = Reader::new(buf);
        let header = r.u8()?;
        if message_type(header) != message_type::MESSAGE_PACK {
            return None;
        }
        let single_size = r.u8()? as usize;
        if single_size != MESSAGE_SIZE {
            return None;
        }
        let count = r.u8()? as usize;
        if count == 0 || count > MAX_PACK_MESSAGES {
            return None;
        }
        let messages = r.bytes(count * MESSAGE_SIZE)?;
        Some(Self { messages })
    }

    /// Number of messages in the pack.
    pub fn len(&self) -> usize {
        self.messages.len() / MESSAGE_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Raw 25-byte messages in pack order.
    pub fn raw_messages(&self) -> impl Iterator<Item = &'a [u8; MESSAGE_SIZE]> + 'a {
        self.messages
            .chunks_exact(MESSAGE_SIZE)
            .filter_map(|chunk| chunk.try_into().ok())
    }

    /// Decoded messages in pack order, skipping kinds we don't use.
    pub fn messages(&self) -> impl Iterator<Item = Message> + 'a {
        self.raw_messages().filter_map(decode_message)
    }
}

// ── Test encoders ──────────────────────────────────────────────────────

/// Encoders producing on-air messages, used by tests across the crate.
#[cfg(test)]
pub(crate) mod encode {
    use super::*;

    pub fn basic_id(uas_id: &str) -> [u8; MESSAGE_SIZE] {
        let mut m = [0u8; MESSAGE_SIZE];
        m[0] = (message_type::BASIC_ID << 4) | 0x02;
        m[1] = (1 << 4) | 2; // serial number, multirotor
        m[2..2 + uas_id.len()].copy_from_slice(uas_id.as_bytes());
        m
    }

    pub fn location(lat: f64, lon: f64, alt_geo: f32) -> [u8; MESSAGE_SIZE] {
        let mut m = [0u8; MESSAGE_SIZE];
        m[0] = (message_type::LOCATION << 4) | 0x02;
        m[1] = 2 << 4; // airborne
        m[2] = 90;
        m[3] = 40; // 10 m/s
        m[4] = 2; // 1 m/s
        m[5..9].copy_from_slice(&((lat * LATLON_MULT).round() as i32).to_le_bytes());
        m[9..13].copy_from_slice(&((lon * LATLON_MULT).round() as i32).to_le_bytes());
        let alt = ((alt_geo + ALT_ADDER) / ALT_DIV) as u16;
        m[13..15].copy_from_slice(&alt.to_le_bytes());
        m[15..17].copy_from_slice(&alt.to_le_bytes());
        let height = ((50.0 + ALT_ADDER) / ALT_DIV) as u16;
        m[17..19].copy_from_slice(&height.to_le_bytes());
        m
    }

    pub fn system(lat: f64, lon: f64) -> [u8; MESSAGE_SIZE] {
        let mut m = [0u8; MESSAGE_SIZE];
        m[0] = (message_type::SYSTEM << 4) | 0x02;
        m[1] = 0x01; // live GNSS
        m[2..6].copy_from_slice(&((lat * LATLON_MULT).round() as i32).to_le_bytes());
        m[6..10].copy_from_slice(&((lon * LATLON_MULT).round() as i32).to_le_bytes());
        m[10..12].copy_from_slice(&1u16.to_le_bytes());
        m
    }

    pub fn operator_id(op_id: &str) -> [u8; MESSAGE_SIZE] {
        let mut m = [0u8; MESSAGE_SIZE];
        m[0] = (message_type::OPERATOR_ID << 4) | 0x02;
        m[2..2 + op_id.len()].copy_from_slice(op_id.as_bytes());
        m
    }

    /// Message pack bytes: header + messages.
    pub fn pack(messages: &[[u8; MESSAGE_SIZE]]) -> heapless::Vec<u8, 256> {
        let mut out = heapless::Vec::new();
        let _ = out.push((message_type::MESSAGE_PACK << 4) | 0x02);
        let _ = out.push(MESSAGE_SIZE as u8);
        let _ = out.push(messages.len() as u8);
        for m in messages {
            let _ = out.extend_from_slice(m);
        }
        out
    }
}
