//! meshdetect head-end: ESP-IDF std firmware
//!
//! Sits on the relay radio's UART and turns the mesh stream into a clean
//! NDJSON feed on USB serial: duplicate reports of one drone from several
//! nodes collapse to the first, mesh text is tagged, and heartbeat/stats
//! lines are added on a timer. Anything typed on USB serial is passed
//! through to the relay radio.

use std::io::Read;
use std::thread;
use std::time::{Duration, Instant};

use esp_idf_svc::hal::delay::NON_BLOCK;
use esp_idf_svc::hal::gpio::AnyIOPin;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::uart::{config::Config as UartConfig, UartDriver, UartTxDriver};
use esp_idf_svc::hal::units::Hertz;

use meshdetect::board;
use meshdetect::bridge::Bridge;
use meshdetect::comm::{self, LineReader, LineSink};
use meshdetect::config::{HeadConfig, DEDUP_MAX_DRONES};
use meshdetect::protocol::VERSION;

/// USB serial, towards the mapping application.
struct ConsoleSink;

impl LineSink for ConsoleSink {
    fn write_line(&mut self, line: &str) {
        println!("{}", line);
    }
}

fn main() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    let config = HeadConfig::new();
    let boot = Instant::now();
    let now_ms = move || boot.elapsed().as_millis() as u64;

    log::info!("meshdetect head-end v{} starting on {}", VERSION, board::BOARD_NAME);

    thread::sleep(Duration::from_millis(config.boot_delay_ms));

    let peripherals = Peripherals::take()?;

    let uart_config = UartConfig::new().baudrate(Hertz(comm::SERIAL_BAUD));
    let relay = UartDriver::new(
        peripherals.uart1,
        unsafe { AnyIOPin::new(board::RELAY_TX_PIN as i32) },
        unsafe { AnyIOPin::new(board::RELAY_RX_PIN as i32) },
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &uart_config,
    )?;
    let (relay_tx, mut relay_rx) = relay.into_split();
    log::info!(
        "Relay UART: TX=GPIO{} RX=GPIO{} @ {} baud",
        board::RELAY_TX_PIN,
        board::RELAY_RX_PIN,
        comm::SERIAL_BAUD
    );

    thread::Builder::new()
        .name("passthru".into())
        .stack_size(4096)
        .spawn(move || {
            passthrough_thread(relay_tx);
        })?;

    // ── Relay in, dedup, USB out ─────────────────────────────────────

    let mut bridge: Bridge<DEDUP_MAX_DRONES> = Bridge::new(config, now_ms());
    let mut reader = LineReader::new();
    let mut console = ConsoleSink;
    let mut buf = [0u8; 128];

    loop {
        let n = match relay_rx.read(&mut buf, NON_BLOCK) {
            Ok(n) => n,
            Err(e) => {
                log::warn!("Relay UART read error: {}", e);
                0
            }
        };

        if n > 0 {
            bridge.count_bytes(n);
            for &byte in &buf[..n] {
                if let Some(line) = reader.feed(byte) {
                    bridge.handle_line(line, now_ms(), &mut console);
                }
            }
        }

        bridge.tick(now_ms(), &mut console);

        if n == 0 {
            thread::sleep(Duration::from_millis(10));
        }
    }
}

/// Copies USB serial input to the relay radio byte for byte, so the
/// radio can be configured from the host.
fn passthrough_thread(mut tx: UartTxDriver<'static>) {
    let mut stdin = std::io::stdin();
    let mut buf = [0u8; 64];

    loop {
        match stdin.read(&mut buf) {
            Ok(n) if n > 0 => {
                if tx.write(&buf[..n]).is_err() {
                    log::warn!("Relay UART write failed");
                }
            }
            _ => thread::sleep(Duration::from_millis(20)),
        }
    }
}
