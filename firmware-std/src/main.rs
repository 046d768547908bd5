//! meshdetect node: ESP-IDF std firmware
//!
//! Thread-based sensing node. The Wi-Fi promiscuous callback and the NimBLE
//! scan thread both feed the shared pipeline, and on dual-core parts they
//! genuinely run in parallel. One emitter thread drains the pipeline and
//! writes every detection to USB serial and to the relay radio's UART.

use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use esp_idf_svc::hal::delay::NON_BLOCK;
use esp_idf_svc::hal::gpio::AnyIOPin;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::task::block_on;
use esp_idf_svc::hal::uart::{config::Config as UartConfig, UartDriver, UartRxDriver, UartTxDriver};
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::sys::{
    esp, esp_mac_type_t_ESP_MAC_WIFI_STA, esp_read_mac, esp_wifi_set_channel,
    esp_wifi_set_promiscuous, esp_wifi_set_promiscuous_rx_cb, uart_get_tx_buffer_free_size,
    wifi_promiscuous_pkt_t, wifi_promiscuous_pkt_type_t, wifi_second_chan_t_WIFI_SECOND_CHAN_NONE,
};
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};
use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs::EspDefaultNvsPartition};

use esp32_nimble::{BLEDevice, BLEScan};

use meshdetect::channel::ChannelHopper;
use meshdetect::comm::{self, Emitter, LineReader, LineSink};
use meshdetect::config::{NodeConfig, MAX_DRONES, QUEUE_DEPTH};
use meshdetect::pipeline::Pipeline;
use meshdetect::protocol::{MacAddr, NodeHeartbeat, SensorTag, VERSION};
use meshdetect::{board, scanner};

// ── Shared state ─────────────────────────────────────────────────────

static PIPELINE: Pipeline<CriticalSectionRawMutex, MAX_DRONES, QUEUE_DEPTH> = Pipeline::new();

static CONFIG: NodeConfig = NodeConfig::new();

/// Boot time, set once in main. Sighting timestamps count from here. Reads
/// take no lock, so the Wi-Fi callback may call `now_ms`.
static BOOT_INSTANT: OnceLock<Instant> = OnceLock::new();

fn now_ms() -> u64 {
    BOOT_INSTANT
        .get()
        .map(|boot| boot.elapsed().as_millis() as u64)
        .unwrap_or(0)
}

// ── Sinks ────────────────────────────────────────────────────────────

/// USB serial console. Data lines skip the logger so they stay plain NDJSON.
struct ConsoleSink;

impl LineSink for ConsoleSink {
    fn write_line(&mut self, line: &str) {
        println!("{}", line);
    }
}

/// Relay radio UART. Space is whatever the driver's TX ring buffer has left.
struct RelaySink {
    tx: UartTxDriver<'static>,
}

impl LineSink for RelaySink {
    fn write_line(&mut self, line: &str) {
        if self.tx.write(line.as_bytes()).is_err() || self.tx.write(b"\n").is_err() {
            log::warn!("Relay UART write failed");
        }
    }

    fn writable(&self) -> usize {
        let mut free = 0usize;
        match esp!(unsafe { uart_get_tx_buffer_free_size(self.tx.port(), &mut free) }) {
            Ok(()) => free,
            Err(_) => 0,
        }
    }
}

// ── WiFi promiscuous callback ────────────────────────────────────────

/// WiFi promiscuous mode callback.
///
/// Runs in the WiFi driver task and must not block: the pipeline lock is a
/// short critical section and the hand-off is `try_send`.
unsafe extern "C" fn promisc_rx_cb(
    buf: *mut std::ffi::c_void,
    _pkt_type: wifi_promiscuous_pkt_type_t,
) {
    let pkt = unsafe { &*(buf as *const wifi_promiscuous_pkt_t) };
    let rssi = pkt.rx_ctrl.rssi() as i8;
    let sig_len = pkt.rx_ctrl.sig_len() as usize;

    if sig_len == 0 {
        return;
    }

    // Safety: payload is `sig_len` bytes starting at pkt.payload
    let payload = unsafe { std::slice::from_raw_parts(pkt.payload.as_ptr(), sig_len) };

    if let Some(sighting) = scanner::parse_wifi_frame(payload, rssi, now_ms()) {
        PIPELINE.ingest(&sighting);
    }
}

fn read_sensor_tag() -> anyhow::Result<SensorTag> {
    let mut mac: MacAddr = [0; 6];
    esp!(unsafe { esp_read_mac(mac.as_mut_ptr(), esp_mac_type_t_ESP_MAC_WIFI_STA) })?;
    Ok(SensorTag::from_mac(&mac))
}

fn main() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    let _ = BOOT_INSTANT.set(Instant::now());

    let tag = read_sensor_tag()?;
    log::info!(
        "meshdetect node v{} starting on {} (std), node id {}",
        VERSION,
        board::BOARD_NAME,
        tag
    );

    // Let the relay radio finish booting before its UART is touched
    thread::sleep(Duration::from_millis(CONFIG.boot_delay_ms));

    // ── Peripherals ──────────────────────────────────────────────────

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // ── Relay UART ───────────────────────────────────────────────────

    let uart_config = UartConfig::new().baudrate(Hertz(comm::SERIAL_BAUD));
    let relay = UartDriver::new(
        peripherals.uart1,
        unsafe { AnyIOPin::new(board::RELAY_TX_PIN as i32) },
        unsafe { AnyIOPin::new(board::RELAY_RX_PIN as i32) },
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &uart_config,
    )?;
    let (relay_tx, relay_rx) = relay.into_split();
    log::info!(
        "Relay UART: TX=GPIO{} RX=GPIO{} @ {} baud",
        board::RELAY_TX_PIN,
        board::RELAY_RX_PIN,
        comm::SERIAL_BAUD
    );

    // ── Emitter thread ───────────────────────────────────────────────

    thread::Builder::new()
        .name("emitter".into())
        .stack_size(6144)
        .spawn(move || {
            emitter_thread(tag, RelaySink { tx: relay_tx });
        })?;
    log::info!("Emitter thread spawned");

    // ── Relay RX thread ──────────────────────────────────────────────

    thread::Builder::new()
        .name("relayrx".into())
        .stack_size(4096)
        .spawn(move || {
            relay_rx_thread(relay_rx);
        })?;

    // ── Heartbeat thread ─────────────────────────────────────────────

    thread::Builder::new()
        .name("heartbeat".into())
        .stack_size(4096)
        .spawn(move || {
            heartbeat_thread(tag, CONFIG);
        })?;

    // ── WiFi sniffer ─────────────────────────────────────────────────

    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sys_loop.clone(), Some(nvs))?,
        sys_loop,
    )?;
    wifi.set_configuration(&esp_idf_svc::wifi::Configuration::Client(Default::default()))?;
    wifi.start()?;

    if CONFIG.wifi_enabled {
        unsafe {
            esp!(esp_wifi_set_promiscuous(true))?;
            esp!(esp_wifi_set_promiscuous_rx_cb(Some(promisc_rx_cb)))?;
        }
        log::info!("WiFi sniffer initialized in promiscuous mode");

        thread::Builder::new()
            .name("chanhop".into())
            .stack_size(2048)
            .spawn(move || {
                channel_hop_thread(board::DUAL_BAND, CONFIG.dwell_ms);
            })?;
        log::info!(
            "Channel hop thread spawned ({})",
            if board::DUAL_BAND { "2.4 + 5 GHz" } else { "2.4 GHz" }
        );
    }

    // ── BLE (NimBLE) on the main thread ────────────────────────────

    if CONFIG.ble_enabled {
        log::info!(
            "BLE scan on {} core part",
            if board::DUAL_CORE { "dual" } else { "single" }
        );
        ble_scan_loop();
    }

    // Keep the Wi-Fi driver alive when BLE is disabled
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

// ── Channel hopping ──────────────────────────────────────────────────

fn channel_hop_thread(dual_band: bool, dwell_ms: u64) {
    for ch in ChannelHopper::new(dual_band) {
        unsafe {
            esp_wifi_set_channel(ch, wifi_second_chan_t_WIFI_SECOND_CHAN_NONE);
        }
        thread::sleep(Duration::from_millis(dwell_ms));
    }
}

// ── Emitter thread ───────────────────────────────────────────────────

fn emitter_thread(tag: SensorTag, mut relay: RelaySink) {
    log::info!("Emitter thread started");
    let mut emitter = Emitter::new(tag);
    let mut console = ConsoleSink;

    loop {
        let record = block_on(PIPELINE.next());
        if !emitter.emit(&record, &mut console, &mut relay) {
            log::debug!(
                "Relay busy, dropped relay copy ({} total)",
                emitter.relay_dropped()
            );
        }
    }
}

// ── Relay RX thread ──────────────────────────────────────────────────

/// Echoes relay lines (mesh chatter, other nodes) to USB serial.
fn relay_rx_thread(mut rx: UartRxDriver<'static>) {
    let mut reader = LineReader::new();
    let mut console = ConsoleSink;
    let mut buf = [0u8; 64];

    loop {
        let n = match rx.read(&mut buf, NON_BLOCK) {
            Ok(n) => n,
            Err(e) => {
                log::warn!("Relay UART read error: {}", e);
                0
            }
        };
        if n == 0 {
            thread::sleep(Duration::from_millis(10));
            continue;
        }
        for &byte in &buf[..n] {
            if let Some(line) = reader.feed(byte) {
                if let Ok(text) = std::str::from_utf8(line) {
                    console.write_line(text);
                }
            }
        }
    }
}

// ── Heartbeat thread ─────────────────────────────────────────────────

fn heartbeat_thread(tag: SensorTag, config: NodeConfig) {
    let node_id = tag.as_string();
    let mut console = ConsoleSink;
    loop {
        thread::sleep(Duration::from_millis(config.heartbeat_interval_ms));
        let tracked = PIPELINE.tracked(now_ms(), config.active_window_ms) as u32;
        comm::send_message(&NodeHeartbeat::new(&node_id, tracked), &mut console);
        log::debug!(
            "Pipeline: {} queued, {} dropped",
            PIPELINE.queued(),
            PIPELINE.dropped()
        );
    }
}

// ── BLE scan loop ────────────────────────────────────────────────────

fn ble_scan_loop() -> ! {
    log::info!("BLE scan started");

    let ble_device = BLEDevice::take();
    let mut scan = BLEScan::new();
    scan.active_scan(false).interval(100).window(99);

    // Passive scan in 5-second rounds
    loop {
        let result = block_on(scan.start(ble_device, 5000, |device, data| {
            let mac = device.addr().as_be_bytes();
            if let Some(sighting) =
                scanner::parse_ble_adv(&mac, device.rssi(), now_ms(), data.payload())
            {
                PIPELINE.ingest(&sighting);
            }
            None::<()>
        }));
        if let Err(e) = result {
            log::warn!("BLE scan round failed: {:?}", e);
            thread::sleep(Duration::from_secs(1));
        }
    }
}
