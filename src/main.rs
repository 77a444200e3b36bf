//! Command-line front end: find an HM-10 module by name, show its GATT
//! table, and chat with it over the serial characteristic.
//!
//! Run with: cargo run -- --name sallen_hm10 chat

use clap::{ArgAction, Parser, Subcommand};
use hm10_bridge::ble::uuids;
use hm10_bridge::config::{self, BridgeConfig};
use hm10_bridge::{
    bridge, format_services, render_payload, to_hex, BleScanner, BtleplugCentral, Central,
    DiscoveredDevice, Error, Result, Session,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "hm10-bridge")]
#[command(about = "Find an HM-10 BLE serial module and talk to it", long_about = None)]
#[command(version)]
struct Cli {
    /// Advertised name of the target device
    #[arg(short, long, env = "HM10_DEVICE_NAME", default_value = config::DEFAULT_DEVICE_NAME, global = true)]
    name: String,

    /// Scan duration in seconds
    #[arg(long, env = "HM10_SCAN_TIMEOUT", default_value_t = config::DEFAULT_SCAN_TIMEOUT.as_secs(), global = true)]
    scan_timeout: u64,

    /// Bound on connecting and service discovery, in seconds
    #[arg(long, env = "HM10_CONNECT_TIMEOUT", default_value_t = config::DEFAULT_CONNECT_TIMEOUT.as_secs(), global = true)]
    connect_timeout: u64,

    /// Serial service UUID
    #[arg(long, default_value_t = uuids::HM10_SERVICE_UUID, global = true)]
    service: Uuid,

    /// Serial characteristic UUID
    #[arg(long, default_value_t = uuids::HM10_CHARACTERISTIC_UUID, global = true)]
    characteristic: Uuid,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// List every device in range
    Scan,
    /// Print the target's services and characteristics
    Services,
    /// Interactive serial session with the target (default)
    Chat,
}

impl Cli {
    fn config(&self) -> BridgeConfig {
        BridgeConfig {
            device_name: self.name.clone(),
            scan_timeout: Duration::from_secs(self.scan_timeout),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            service_uuid: self.service,
            characteristic_uuid: self.characteristic,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.config();
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let command = cli.command.unwrap_or(Command::Chat);
    let result = runtime.block_on(execute(command, &config));

    // A pending stdin read cannot be cancelled; don't wait for it.
    runtime.shutdown_timeout(Duration::from_millis(100));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        // Already reported by the scan result frame.
        Err(Error::DeviceNotFound { .. }) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if fails_run(&e) {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
    }
}

/// Whether an error ends the run with a failure status.
///
/// Only adapter and connection problems do; errors inside an established
/// session have already been reported and are not a failed run.
fn fails_run(error: &Error) -> bool {
    error.is_fatal() || matches!(error, Error::Bluetooth(_))
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "hm10_bridge={level},btleplug={level}"
                ))
            }),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn execute(command: Command, config: &BridgeConfig) -> Result<()> {
    let central = Arc::new(BtleplugCentral::new().await?);
    debug!("Running {:?}", command);

    match command {
        Command::Scan => cmd_scan(central, config).await,
        Command::Services => cmd_services(central, config).await,
        Command::Chat => cmd_chat(central, config).await,
    }
}

fn print_scan_banner(name: &str) {
    println!("Scanning for Bluetooth LE devices...");
    println!("Looking for device: '{}'", name);
    println!("{}", "-".repeat(50));
}

fn print_scan_result(name: &str, found: Option<&DiscoveredDevice>) {
    let rule = "=".repeat(50);
    println!("{}", rule);
    match found {
        Some(device) => {
            println!("✓ Device '{}' found!", name);
            println!("Address: {}", device.address);
        }
        None => println!("✗ Device '{}' not found", name),
    }
    println!("{}", rule);
}

async fn cmd_scan(central: Arc<BtleplugCentral>, config: &BridgeConfig) -> Result<()> {
    print_scan_banner(&config.device_name);

    let scanner = BleScanner::new(central);
    let devices = scanner.discover(config.scan_timeout).await?;

    println!("\nFound {} device(s)", devices.len());
    println!("{}", "-".repeat(50));

    for device in &devices {
        println!("Device: {}", device.display_name());
        println!("Address: {}", device.address);
        if let Some(rssi) = device.rssi {
            println!("RSSI: {} dBm", rssi);
        }
        println!();
    }

    let found = hm10_bridge::ble::find_by_name(&devices, &config.device_name);
    print_scan_result(&config.device_name, found);
    Ok(())
}

/// Scan for the configured device, printing the banner and the outcome.
///
/// Returns [`Error::DeviceNotFound`] when nothing advertised the name.
async fn find_target(central: Arc<BtleplugCentral>, config: &BridgeConfig) -> Result<DiscoveredDevice> {
    print_scan_banner(&config.device_name);

    let scanner = BleScanner::new(central);
    let found = scanner
        .find_by_name(&config.device_name, config.scan_timeout)
        .await?;

    print_scan_result(&config.device_name, found.as_ref());
    found.ok_or_else(|| Error::DeviceNotFound {
        name: config.device_name.clone(),
    })
}

async fn connect(central: &dyn Central, address: &str, config: &BridgeConfig) -> Result<Session> {
    println!("\nConnecting to device at {}...", address);
    let session = Session::connect(central, address, config.connect_timeout).await?;
    println!("Connected: {}", session.is_connected());
    Ok(session)
}

fn print_services(session: &Session, config: &BridgeConfig) -> Result<()> {
    let rule = "=".repeat(70);
    println!("\n{}", rule);
    println!("SERVICES AND CHARACTERISTICS");
    println!("{}", rule);
    print!("{}", format_services(session.list_services()?));
    println!("\n{}", rule);

    let label = if uuids::is_hm10_service(&config.service_uuid) {
        "HM-10 serial service"
    } else {
        "Serial service"
    };
    match session.service(&config.service_uuid) {
        Some(_) => println!("✓ {} {} present", label, config.service_uuid),
        None => println!("✗ {} {} not found", label, config.service_uuid),
    }

    match session.characteristic(&config.characteristic_uuid) {
        None => println!(
            "✗ Serial characteristic {} not found",
            config.characteristic_uuid
        ),
        Some(c) if !c.properties.can_write() => println!(
            "✗ Serial characteristic {} is not writable",
            config.characteristic_uuid
        ),
        Some(_) => {}
    }
    Ok(())
}

async fn cmd_services(central: Arc<BtleplugCentral>, config: &BridgeConfig) -> Result<()> {
    let device = find_target(central.clone(), config).await?;

    let session = connect(central.as_ref(), &device.address, config).await?;
    let listed = print_services(&session, config);

    match session.disconnect().await {
        Ok(()) => println!("✓ Disconnected from device"),
        Err(e) => println!("   Disconnect failed: {}", e),
    }
    listed
}

async fn cmd_chat(central: Arc<BtleplugCentral>, config: &BridgeConfig) -> Result<()> {
    let device = find_target(central.clone(), config).await?;

    let session = connect(central.as_ref(), &device.address, config).await?;
    if let Err(e) = print_services(&session, config) {
        let _ = session.disconnect().await;
        return Err(e);
    }

    // The module reports its buffered value when readable.
    let readable = session
        .characteristic(&config.characteristic_uuid)
        .is_some_and(|c| c.properties.read);
    if readable {
        match session.read(&config.characteristic_uuid).await {
            Ok(value) if !value.is_empty() => println!(
                "Current value: {} (Hex: {})",
                render_payload(&value),
                to_hex(&value)
            ),
            Ok(_) => {}
            Err(e) => debug!("Initial read failed: {}", e),
        }
    }
    println!();

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let exit = bridge::run(
        &session,
        config.characteristic_uuid,
        BufReader::new(tokio::io::stdin()),
        &mut tokio::io::stdout(),
        shutdown,
    )
    .await?;

    info!("Chat ended: {:?}", exit);
    Ok(())
}
