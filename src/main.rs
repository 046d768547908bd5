//! meshdetect node: Remote ID sensing unit (Embassy, no_std)
//!
//! Listens for Open Drone ID broadcasts on Wi-Fi (promiscuous sniffer with
//! channel hopping) and BLE (passive scan), merges them into a small drone
//! table, and streams one NDJSON detection line per update to USB serial and
//! to a Meshtastic relay radio on UART1. Lines arriving from the relay are
//! echoed to USB serial.
//!
//! Both listeners feed the shared pipeline from driver callbacks; a single
//! emitter task drains it so output lines never interleave.

#![no_std]
#![no_main]

extern crate alloc;

use esp_backtrace as _;

esp_bootloader_esp_idf::esp_app_desc!();

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Timer};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{Config as UartConfig, Uart, UartRx, UartTx};
use esp_hal::Async;
use static_cell::StaticCell;

use trouble_host::prelude::*;

use meshdetect::channel::ChannelHopper;
use meshdetect::comm::{self, Emitter, LineReader, LineSink};
use meshdetect::config::{NodeConfig, MAX_DRONES, QUEUE_DEPTH, RELAY_QUEUE_DEPTH};
use meshdetect::pipeline::Pipeline;
use meshdetect::protocol::{LineBuffer, NodeHeartbeat, SensorTag, MAX_MSG_LEN, VERSION};
use meshdetect::{board, scanner};

// ── Shared state ──────────────────────────────────────────────────────

type RelayChannel = Channel<CriticalSectionRawMutex, LineBuffer, RELAY_QUEUE_DEPTH>;

/// Drone table + hand-off queue, fed from the Wi-Fi ISR and the BLE runner.
static PIPELINE: Pipeline<CriticalSectionRawMutex, MAX_DRONES, QUEUE_DEPTH> = Pipeline::new();

/// Outbound relay lines, drained by the UART writer task.
static RELAY_CHANNEL: RelayChannel = Channel::new();

static CONFIG: NodeConfig = NodeConfig::new();

fn now_ms() -> u64 {
    Instant::now().as_millis()
}

// ── Sinks ─────────────────────────────────────────────────────────────

/// USB serial. Data lines bypass the logger so the mapper sees plain NDJSON.
struct ConsoleSink;

impl LineSink for ConsoleSink {
    fn write_line(&mut self, line: &str) {
        esp_println::println!("{}", line);
    }
}

/// Relay radio UART, via the writer task's queue. Has room for a line only
/// while the queue has a free slot.
struct RelaySink;

impl LineSink for RelaySink {
    fn write_line(&mut self, line: &str) {
        let mut buf = LineBuffer::new();
        if buf.push_str(line).is_ok() {
            let _ = RELAY_CHANNEL.try_send(buf);
        }
    }

    fn writable(&self) -> usize {
        if RELAY_CHANNEL.free_capacity() > 0 {
            MAX_MSG_LEN + 1
        } else {
            0
        }
    }
}

// ── WiFi sniffer ──────────────────────────────────────────────────────

/// WiFi sniffer callback, called from ISR context by the esp-radio sniffer.
///
/// Classifies the frame and merges any Remote ID content into the pipeline.
/// Never blocks: the table lock is a short critical section and the queue
/// push is `try_send`.
fn wifi_sniffer_callback(pkt: esp_radio::wifi::sniffer::PromiscuousPkt<'_>) {
    let rssi = pkt.rx_cntl.rssi as i8;
    if let Some(sighting) = scanner::parse_wifi_frame(pkt.data, rssi, now_ms()) {
        PIPELINE.ingest(&sighting);
    }
}

// FFI binding for WiFi channel control.
// The symbol is linked via esp-radio's WiFi driver.
unsafe extern "C" {
    fn esp_wifi_set_channel(primary: u8, second: u32) -> i32;
}

/// WiFi channel hop task. Alternates bands on dual-band parts.
#[embassy_executor::task]
async fn wifi_channel_hop_task(dual_band: bool, dwell_ms: u64) {
    let mut hopper = ChannelHopper::new(dual_band);
    loop {
        let ch = hopper.next_channel();
        unsafe {
            esp_wifi_set_channel(ch, 0);
        }
        Timer::after(Duration::from_millis(dwell_ms)).await;
    }
}

// ── BLE scan event handler ────────────────────────────────────────────

/// EventHandler for BLE advertisement reports from trouble-host.
///
/// Called synchronously from the runner; must not block.
struct ScanEventHandler;

impl EventHandler for ScanEventHandler {
    fn on_adv_reports(&self, mut it: LeAdvReportsIter<'_>) {
        while let Some(Ok(report)) = it.next() {
            let Ok(raw) = <[u8; 6]>::try_from(report.addr.raw()) else {
                continue;
            };
            // HCI addresses are little-endian
            let mut mac = raw;
            mac.reverse();
            if let Some(sighting) =
                scanner::parse_ble_adv(&mac, report.rssi, now_ms(), report.data)
            {
                PIPELINE.ingest(&sighting);
            }
        }
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────

/// Sole consumer of the pipeline: formats each snapshot and writes it to
/// both sinks.
#[embassy_executor::task]
async fn emit_task(tag: SensorTag) {
    log::info!("Emitter started, node {}", tag);
    let mut emitter = Emitter::new(tag);
    let mut console = ConsoleSink;
    let mut relay = RelaySink;

    loop {
        let record = PIPELINE.next().await;
        if !emitter.emit(&record, &mut console, &mut relay) {
            log::debug!("Relay busy, dropped relay copy ({} total)", emitter.relay_dropped());
        }
    }
}

/// Writes queued lines to the relay radio once it has had time to boot.
#[embassy_executor::task]
async fn relay_tx_task(mut tx: UartTx<'static, Async>, boot_delay_ms: u64) {
    Timer::after(Duration::from_millis(boot_delay_ms)).await;
    log::info!("Relay UART ready");

    loop {
        let line = RELAY_CHANNEL.receive().await;
        if write_all(&mut tx, line.as_bytes()).await.is_err()
            || write_all(&mut tx, b"\n").await.is_err()
        {
            log::warn!("Relay UART write failed");
        }
    }
}

async fn write_all(tx: &mut UartTx<'static, Async>, mut data: &[u8]) -> Result<(), ()> {
    while !data.is_empty() {
        match tx.write_async(data).await {
            Ok(0) | Err(_) => return Err(()),
            Ok(n) => data = &data[n..],
        }
    }
    Ok(())
}

/// Echoes lines from the relay radio (mesh chatter, other nodes) to USB.
#[embassy_executor::task]
async fn relay_rx_task(mut rx: UartRx<'static, Async>) {
    let mut reader = LineReader::new();
    let mut console = ConsoleSink;
    let mut buf = [0u8; 64];

    loop {
        let n = match rx.read_async(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                log::warn!("Relay UART read error: {:?}", e);
                continue;
            }
        };
        for &byte in &buf[..n] {
            if let Some(line) = reader.feed(byte) {
                if let Ok(text) = core::str::from_utf8(line) {
                    console.write_line(text);
                }
            }
        }
    }
}

/// Periodic liveness line with the number of recently seen drones.
#[embassy_executor::task]
async fn heartbeat_task(tag: SensorTag, config: NodeConfig) {
    let node_id = tag.as_string();
    let mut console = ConsoleSink;
    loop {
        Timer::after(Duration::from_millis(config.heartbeat_interval_ms)).await;
        let tracked = PIPELINE.tracked(now_ms(), config.active_window_ms) as u32;
        comm::send_message(&NodeHeartbeat::new(&node_id, tracked), &mut console);
        log::debug!(
            "Pipeline: {} queued, {} dropped",
            PIPELINE.queued(),
            PIPELINE.dropped()
        );
    }
}

// ── Entry point ──────────────────────────────────────────────────────

#[esp_rtos::main]
async fn main(spawner: embassy_executor::Spawner) {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // Heap for the BLE + WiFi coex stacks
    esp_alloc::heap_allocator!(size: 128 * 1024);

    // Start the RTOS: requires timer + software interrupt
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    let tag = SensorTag::from_mac(&esp_hal::efuse::Efuse::mac_address());
    log::info!(
        "meshdetect node v{} starting on {}, node id {}",
        VERSION,
        board::BOARD_NAME,
        tag
    );

    // ── Relay UART ──────────────────────────────────────────────────────

    #[cfg(feature = "board-xiao-s3")]
    let (relay_tx_pin, relay_rx_pin) = (peripherals.GPIO5, peripherals.GPIO6);
    #[cfg(feature = "board-xiao-c6")]
    let (relay_tx_pin, relay_rx_pin) = (peripherals.GPIO22, peripherals.GPIO23);

    let uart_config = UartConfig::default().with_baudrate(comm::SERIAL_BAUD);
    let relay_uart = Uart::new(peripherals.UART1, uart_config)
        .expect("Relay UART init failed")
        .with_tx(relay_tx_pin)
        .with_rx(relay_rx_pin)
        .into_async();
    let (relay_rx, relay_tx) = relay_uart.split();

    log::info!(
        "Relay UART: TX=GPIO{} RX=GPIO{} @ {} baud",
        board::RELAY_TX_PIN,
        board::RELAY_RX_PIN,
        comm::SERIAL_BAUD
    );

    spawner.spawn(emit_task(tag)).unwrap();
    spawner.spawn(relay_tx_task(relay_tx, CONFIG.boot_delay_ms)).unwrap();
    spawner.spawn(relay_rx_task(relay_rx)).unwrap();
    spawner.spawn(heartbeat_task(tag, CONFIG)).unwrap();

    // ── BLE radio initialization ───────────────────────────────────────
    // BLE must be initialized BEFORE WiFi for coexistence to work
    // (especially on ESP32-S3).

    let connector =
        esp_radio::ble::controller::BleConnector::new(peripherals.BT, Default::default())
            .expect("BLE connector init failed");

    log::info!("BLE connector initialized");

    // ── WiFi sniffer initialization ─────────────────────────────────────

    let (_wifi_controller, wifi_interfaces) =
        esp_radio::wifi::new(peripherals.WIFI, Default::default()).expect("WiFi init failed");

    let mut sniffer = wifi_interfaces.sniffer;
    if CONFIG.wifi_enabled {
        sniffer.set_receive_cb(wifi_sniffer_callback);
        sniffer
            .set_promiscuous_mode(true)
            .expect("Promiscuous mode failed");

        spawner
            .spawn(wifi_channel_hop_task(board::DUAL_BAND, CONFIG.dwell_ms))
            .unwrap();

        log::info!(
            "WiFi sniffer in promiscuous mode ({})",
            if board::DUAL_BAND { "2.4 + 5 GHz" } else { "2.4 GHz" }
        );
    }

    let controller: ExternalController<_, 20> = ExternalController::new(connector);

    static HOST_RESOURCES: StaticCell<HostResources<DefaultPacketPool, 1, 2>> = StaticCell::new();
    let resources = HOST_RESOURCES.init(HostResources::new());

    let address = Address::random([0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xab]);

    let stack = trouble_host::new(controller, resources).set_random_address(address);
    let Host {
        central,
        mut runner,
        ..
    } = stack.build();

    log::info!("BLE radio initialized");

    let scan_handler = ScanEventHandler;

    // ── BLE orchestration ──────────────────────────────────────────────
    //
    //   1. BLE stack runner (drives HCI, delivers scan reports to handler)
    //   2. BLE scanner (starts scan, keeps session alive)

    let _ = embassy_futures::join::join(
        async {
            loop {
                if let Err(e) = runner.run_with_handler(&scan_handler).await {
                    log::error!("BLE runner error: {:?}", e);
                    Timer::after(Duration::from_secs(1)).await;
                }
            }
        },
        async {
            if !CONFIG.ble_enabled {
                return;
            }
            let mut scanner = trouble_host::scan::Scanner::new(central);
            let config = ScanConfig {
                active: false,
                ..Default::default()
            };

            let _session = match scanner.scan(&config).await {
                Ok(session) => session,
                Err(e) => {
                    log::error!("BLE scan failed to start: {:?}", e);
                    return;
                }
            };

            log::info!("BLE scan started (passive, continuous)");
            // Reports flow through ScanEventHandler on the runner while
            // the session is alive.
            loop {
                Timer::after(Duration::from_secs(60)).await;
            }
        },
    )
    .await;
}
