//! CLI Entry Point for ultrasonic-daq
//!
//! Provides command-line access to:
//! - CRC-16 computation and frame assembly (offline)
//! - One request/response exchange with a configured instrument
//! - A simulated telemetry run through the sampling aggregator
//!
//! # Usage
//!
//! ```bash
//! ultrasonic-daq checksum "01 04 00 01 00 01"
//! ultrasonic-daq frame --address 1 --function 4 00010001
//! ultrasonic-daq --config config/ultrasonic.toml exchange ultrasound 010400010001600A
//! ultrasonic-daq simulate --samples 50
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use ultrasonic_daq::config::{AppConfig, DEFAULT_CONFIG_PATH};
use ultrasonic_daq::protocol::{frame, ByteOrder, Checksum, Frame};
use ultrasonic_daq::reader::ReaderLoop;
use ultrasonic_daq::registry::{DeviceClass, DeviceRegistry, SettingsProvider};
use ultrasonic_daq::sampling::SamplingAggregator;
use ultrasonic_daq::settings::TomlSettings;
use ultrasonic_daq::telemetry::{RegisterDecoder, TelemetryListener};
use ultrasonic_daq::transport::simulated::modbus_echo_responder;
use ultrasonic_daq::transport::{
    AsyncTransport, SimulatedConnector, SimulatedDevice, Transport, TransportListener,
};
use ultrasonic_daq::{logging, ChannelAddress};

#[derive(Parser)]
#[command(name = "ultrasonic-daq")]
#[command(about = "Instrument transport and telemetry tools for ultrasonic fatigue rigs", long_about = None)]
struct Cli {
    /// Configuration file (also holds the [devices] channel records)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the CRC-16 of a hex byte string
    Checksum {
        /// Bytes as hex, e.g. "01 04 00 01 00 01"
        bytes: String,
    },

    /// Assemble a checksum-terminated frame
    Frame {
        /// Device address
        #[arg(long)]
        address: u8,

        /// Function code
        #[arg(long)]
        function: u8,

        /// Payload as hex
        #[arg(default_value = "")]
        payload: String,

        /// Checksum byte order on the wire
        #[arg(long, value_enum, default_value_t = OrderArg::Low)]
        order: OrderArg,
    },

    /// Send bytes to a configured device and print the reply
    Exchange {
        /// Device class (ultrasound, static_load_serial, static_load_network, air_compressor)
        class: DeviceClass,

        /// Request bytes as hex
        request: String,

        /// Largest reply to accept
        #[arg(long, default_value = "256")]
        max_len: usize,
    },

    /// Stream simulated register frames through the aggregator
    Simulate {
        /// Raw samples to generate
        #[arg(long, default_value = "50")]
        samples: usize,

        /// Quantity name (selects y_wrap from [sampling.y_wrap])
        #[arg(long, default_value = "amplitude")]
        quantity: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrderArg {
    /// Low byte first
    Low,
    /// High byte first
    High,
}

impl From<OrderArg> for ByteOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Low => ByteOrder::LowFirst,
            OrderArg::High => ByteOrder::HighFirst,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Checksum { bytes } => print_checksum(&bytes),
        Commands::Frame {
            address,
            function,
            payload,
            order,
        } => print_frame(address, function, &payload, order.into()),
        Commands::Exchange {
            class,
            request,
            max_len,
        } => {
            let config = load_config(&cli.config)?;
            exchange(&config, &cli.config, class, &request, max_len).await
        }
        Commands::Simulate { samples, quantity } => {
            let config = load_config(&cli.config)?;
            simulate(&config, samples, &quantity).await
        }
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let config = AppConfig::load_from(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config.validate()?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
    Ok(config)
}

fn print_checksum(hex: &str) -> Result<()> {
    let bytes = parse_hex(hex)?;
    let crc = Checksum::of(&bytes);
    println!("CRC-16:     {crc}");
    println!("low first:  {}", to_hex(&crc.to_le_bytes()));
    println!("high first: {}", to_hex(&crc.to_be_bytes()));
    Ok(())
}

fn print_frame(address: u8, function: u8, payload: &str, order: ByteOrder) -> Result<()> {
    let frame = Frame::new(address, function, parse_hex(payload)?);
    println!("{}", to_hex(&frame.encode(order)));
    Ok(())
}

async fn exchange(
    config: &AppConfig,
    config_path: &Path,
    class: DeviceClass,
    request: &str,
    max_len: usize,
) -> Result<()> {
    let request = parse_hex(request)?;
    let settings = Arc::new(TomlSettings::new(config_path));
    let registry = DeviceRegistry::from_config(settings, &config.backend)?;

    if registry.connector_kind(class) == "simulated" {
        if let (Some(simulator), Some(address)) = (
            registry.simulator(),
            registry.settings().load_channel_address(class),
        ) {
            simulator.attach(
                &address,
                SimulatedDevice::with_responder(modbus_echo_responder(ByteOrder::LowFirst)),
            );
        }
    }

    let transport = registry.get_or_create(class)?;
    info!(%class, address = %transport.address(), "Sending {} bytes", request.len());

    let device = AsyncTransport::new(transport);
    let reply = device.write_then_read(request, max_len).await?;
    if reply.is_empty() {
        println!("(no reply before timeout)");
    } else {
        let sealed = frame::is_sealed(&reply, ByteOrder::LowFirst)
            || frame::is_sealed(&reply, ByteOrder::HighFirst);
        println!("{}", to_hex(&reply));
        println!("checksum {}", if sealed { "ok" } else { "INVALID" });
    }

    registry.close_all();
    Ok(())
}

async fn simulate(config: &AppConfig, samples: usize, quantity: &str) -> Result<()> {
    let aggregator = Arc::new(SamplingAggregator::with_system_clock(
        quantity,
        config.sampling.aggregator_config(quantity)?,
    )?);

    let address = ChannelAddress::serial("SIM-TELEMETRY");
    let connector = SimulatedConnector::new();
    let device = connector.attach(&address, SimulatedDevice::new());
    let transport = Arc::new(Transport::new(address, Arc::new(connector)).with_label(quantity));
    transport.open()?;

    let telemetry = Arc::new(TelemetryListener::new(
        quantity,
        RegisterDecoder::new(0x01, 0x04).with_scale(0.1),
        aggregator.clone(),
    ));
    let listener: Arc<dyn TransportListener> = telemetry.clone();
    transport.add_listener(&listener);

    let reader = ReaderLoop::spawn(transport.clone(), 64)?;
    for i in 0..samples {
        let raw = (500.0 + 250.0 * (i as f64 / 8.0).sin()).round() as u16;
        let [hi, lo] = raw.to_be_bytes();
        device.inject(&frame::seal(&[0x01, 0x04, 0x02, hi, lo], ByteOrder::LowFirst));
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while telemetry.samples_seen() < samples as u64 {
        if Instant::now() > deadline {
            bail!(
                "only {} of {samples} samples decoded before the deadline",
                telemetry.samples_seen()
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let summary = reader.stop();
    transport.close();

    let snapshot = aggregator.snapshot();
    println!(
        "{quantity}: {} samples, {} bytes, window {} ({} of {} points, {} pending)",
        telemetry.samples_seen(),
        summary.bytes_read,
        snapshot.duration,
        snapshot.points.len(),
        snapshot.capacity,
        snapshot.pending_samples
    );
    for point in &snapshot.points {
        println!("{:.6}\t{:.2}", point.x, point.y);
    }
    Ok(())
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text
        .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
        .map(|token| token.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();
    if !digits.is_ascii() {
        bail!("hex input contains non-ASCII characters: '{text}'");
    }
    if digits.len() % 2 != 0 {
        bail!("hex input has an odd number of digits: '{text}'");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte '{}'", &digits[i..i + 2]))
        })
        .collect()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
