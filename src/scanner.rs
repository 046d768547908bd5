/// Frame classifier for Open Drone ID broadcasts.
///
/// WiFi: NAN action frames and beacon vendor-specific elements, both carrying
/// a message pack. The ieee80211 crate parses beacon headers; everything
/// inside a frame is read through `Reader`, which cannot run off the end of
/// the buffer.
/// BLE: 16-bit service data with the ASTM UUID 0xFFFA, carrying one message
/// (legacy advertising) or a message pack (BT5 long range).
///
/// All parse functions are safe to call from ISR context (no allocation,
/// no blocking). Anything that doesn't parse cleanly yields `None`.
use ieee80211::match_frames;
use ieee80211::mgmt_frame::BeaconFrame;

use crate::odid::{self, MessagePack, MESSAGE_SIZE};
use crate::protocol::MacAddr;
use crate::reader::Reader;

/// NAN cluster destination address used for Open Drone ID service discovery.
pub const NAN_DEST: MacAddr = [0x51, 0x6F, 0x9A, 0x01, 0x00, 0x00];

/// Open Drone ID NAN service id (first 6 bytes of SHA-256 of
/// "org.opendroneid.remoteid").
pub const NAN_SERVICE_ID: [u8; 6] = [0x88, 0x69, 0x19, 0x9D, 0x92, 0x09];

/// Wi-Fi Alliance OUI.
const WFA_OUI: [u8; 3] = [0x50, 0x6F, 0x9A];
const NAN_OUI_TYPE: u8 = 0x13;
const PUBLIC_ACTION_CATEGORY: u8 = 0x04;
const VENDOR_SPECIFIC_ACTION: u8 = 0x09;
const SERVICE_DESCRIPTOR_ATTR: u8 = 0x03;
const NAN_INSTANCE_ID: u8 = 0x01;
const SERVICE_CONTROL_PUBLISHED: u8 = 0x10;

/// Offset of the destination address in an 802.11 header.
const DEST_OFFSET: usize = 4;
/// Offset of the source/transmitter address in an 802.11 header.
const SOURCE_OFFSET: usize = 10;
/// 802.11 management header length.
const MGMT_HEADER_LEN: usize = 24;

/// Beacon frame-control byte (management, subtype 8).
pub const BEACON_MARKER: u8 = 0x80;
/// Start of tagged elements in a beacon: header + timestamp, interval, capabilities.
pub const BEACON_ELEMENTS_OFFSET: usize = 36;
/// Vendor-specific element id.
const VENDOR_ELEMENT: u8 = 0xDD;
/// OUIs that tag Open Drone ID vendor elements.
pub const ODID_BEACON_OUIS: [[u8; 3]; 2] = [
    [0x90, 0x3A, 0xE6], // ASD-STAN
    [0xFA, 0x0B, 0xBC], // ASTM
];

/// Open Drone ID BLE service UUID (16-bit).
pub const ODID_SERVICE_UUID: u16 = 0xFFFA;
/// Application code preceding the counter in ODID service data.
pub const ODID_APP_CODE: u8 = 0x0D;
/// AD type: service data, 16-bit UUID.
const AD_SERVICE_DATA_16: u8 = 0x16;

/// Which radio path a sighting came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    WiFiNan,
    WiFiBeacon,
    Ble,
}

/// Raw Open Drone ID content extracted from a frame.
#[derive(Debug, Clone, Copy)]
pub enum OdidPayload<'a> {
    /// One full-size message
    Message(&'a [u8; MESSAGE_SIZE]),
    /// A validated message pack
    Pack(MessagePack<'a>),
}

/// One classified broadcast: who sent it, how loud, when, and what it said.
#[derive(Debug, Clone, Copy)]
pub struct Sighting<'a> {
    pub mac: MacAddr,
    pub rssi: i8,
    /// Milliseconds since boot
    pub timestamp: u64,
    pub transport: Transport,
    pub payload: OdidPayload<'a>,
}

/// Classify a raw 802.11 frame captured in promiscuous mode.
pub fn parse_wifi_frame(frame: &[u8], rssi: i8, timestamp: u64) -> Option<Sighting<'_>> {
    let (mac, pack, transport) = if frame.get(DEST_OFFSET..DEST_OFFSET + 6) == Some(&NAN_DEST[..]) {
        let (mac, pack) = parse_nan_action_frame(frame)?;
        (mac, pack, Transport::WiFiNan)
    } else if frame.first() == Some(&BEACON_MARKER) {
        let (mac, pack) = parse_beacon_frame(frame)?;
        (mac, pack, Transport::WiFiBeacon)
    } else {
        return None;
    };

    Some(Sighting {
        mac,
        rssi,
        timestamp,
        transport,
        payload: OdidPayload::Pack(pack),
    })
}

/// Parse a NAN service discovery action frame carrying an ODID message pack.
///
/// Layout after the 24-byte header: category, action, OUI, OUI type, then a
/// service descriptor attribute whose service info is a message counter
/// followed by the pack.
pub fn parse_nan_action_frame(frame: &[u8]) -> Option<(MacAddr, MessagePack<'_>)> {
    let mut r = Reader::new(frame);

    // Management type, action subtype
    if r.u8()? & 0xFC != 0xD0 {
        return None;
    }
    let mac = *Reader::at(frame, SOURCE_OFFSET)?.array::<6>()?;
    r = Reader::at(frame, MGMT_HEADER_LEN)?;

    // NAN service discovery frame header
    if r.u8()? != PUBLIC_ACTION_CATEGORY || r.u8()? != VENDOR_SPECIFIC_ACTION {
        return None;
    }
    r.expect(&WFA_OUI)?;
    if r.u8()? != NAN_OUI_TYPE {
        return None;
    }

    // Service descriptor attribute
    if r.u8()? != SERVICE_DESCRIPTOR_ATTR {
        return None;
    }
    let _attr_len = r.u16_le()?;
    r.expect(&NAN_SERVICE_ID)?;
    if r.u8()? != NAN_INSTANCE_ID {
        return None;
    }
    let _requestor_instance = r.u8()?;
    if r.u8()? != SERVICE_CONTROL_PUBLISHED {
        return None;
    }
    let info_len = r.u8()? as usize;
    let mut info = r.sub(info_len)?;

    let _counter = info.u8()?;
    let pack = MessagePack::parse(info.rest())?;
    Some((mac, pack))
}

/// Scan beacon tagged elements for an ODID vendor element.
///
/// Each element is read through a sub-reader bounded by its declared length,
/// so a length running past the end of the frame stops the scan and the
/// message pack can never extend beyond its element.
pub fn parse_beacon_frame(frame: &[u8]) -> Option<(MacAddr, MessagePack<'_>)> {
    if frame.first() != Some(&BEACON_MARKER) {
        return None;
    }

    let mac = match_frames! {
        frame,
        beacon = BeaconFrame<'_> => {
            beacon.header.transmitter_address.0
        }
    }
    .ok()?;

    let mut r = Reader::at(frame, BEACON_ELEMENTS_OFFSET)?;
    while !r.is_empty() {
        let tag = r.u8()?;
        let len = r.u8()? as usize;
        let mut body = r.sub(len)?;

        if tag != VENDOR_ELEMENT {
            continue;
        }
        let oui_match = ODID_BEACON_OUIS.iter().any(|oui| body.expect(oui).is_some());
        if !oui_match {
            continue;
        }
        // Vendor type + message counter
        if body.skip(2).is_none() {
            continue;
        }
        if let Some(pack) = MessagePack::parse(body.rest()) {
            return Some((mac, pack));
        }
    }

    None
}

/// Parse BLE advertisement data (AD structures) for ODID service data.
///
/// AD structure format: [length] [type] [data...]. A zero length or a length
/// running past the end of the advertisement ends the scan.
pub fn parse_ble_adv<'a>(
    addr: &MacAddr,
    rssi: i8,
    timestamp: u64,
    ad_data: &'a [u8],
) -> Option<Sighting<'a>> {
    let mut r = Reader::new(ad_data);

    while let Some(len) = r.u8() {
        if len == 0 {
            break;
        }
        let mut ad = r.sub(len as usize)?;
        if ad.u8()? != AD_SERVICE_DATA_16 || ad.u16_le() != Some(ODID_SERVICE_UUID) {
            continue;
        }
        let payload = parse_odid_service_data(ad.rest())?;
        return Some(Sighting {
            mac: *addr,
            rssi,
            timestamp,
            transport: Transport::Ble,
            payload,
        });
    }

    None
}

/// Service data after the UUID: [app code 0x0D] [counter] [message or pack].
///
/// Some stacks hand over the data without the application code, so it is
/// skipped only when the remainder still holds a whole message.
pub fn parse_odid_service_data(data: &[u8]) -> Option<OdidPayload<'_>> {
    if data.len() > MESSAGE_SIZE + 1 && data[0] == ODID_APP_CODE {
        if let Some(payload) = message_payload(&data[2..]) {
            return Some(payload);
        }
    }
    message_payload(data.get(1..)?)
}

fn message_payload(buf: &[u8]) -> Option<OdidPayload<'_>> {
    let header = *buf.first()?;
    if odid::message_type(header) == odid::message_type::MESSAGE_PACK {
        MessagePack::parse(buf).map(OdidPayload::Pack)
    } else {
        let msg: &[u8; MESSAGE_SIZE] = buf.get(..MESSAGE_SIZE)?.try_into().ok()?;
        Some(OdidPayload::Message(msg))
    }
}
