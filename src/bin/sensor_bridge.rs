use clap::{App, Arg};
use sensorbridge::cloud::TelemetrySink;
use sensorbridge::{
    Bridge, BridgeSettings, CloudConfig, CloudLink, Endpoint, PointSampler, PointServer,
    PointStore, SimulatedDevice,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "cloud-config.json";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("sensor-bridge")
        .version("0.1.0")
        .author("Industrial Systems Engineering Team")
        .about("🌡️  Industrial sensor simulator bridging a local protocol endpoint to cloud telemetry")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Config descriptor produced by provisioning")
                .takes_value(true)
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::with_name("endpoint")
                .short("e")
                .long("endpoint")
                .value_name("URL")
                .help("Local protocol endpoint URL")
                .takes_value(true)
                .default_value(sensorbridge::config::DEFAULT_ENDPOINT_URL),
        )
        .arg(
            Arg::with_name("device-interval")
                .long("device-interval")
                .value_name("MS")
                .help("Device tick interval in milliseconds")
                .takes_value(true)
                .default_value("1000")
                .validator(validate_ms),
        )
        .arg(
            Arg::with_name("publish-interval")
                .long("publish-interval")
                .value_name("MS")
                .help("Cloud publish interval in milliseconds")
                .takes_value(true)
                .default_value("5000")
                .validator(validate_ms),
        )
        .get_matches();

    println!("🌡️  Industrial Sensor Bridge");
    println!("============================");

    let settings = BridgeSettings {
        endpoint_url: matches
            .value_of("endpoint")
            .unwrap_or(sensorbridge::config::DEFAULT_ENDPOINT_URL)
            .to_string(),
        device_tick: Duration::from_millis(
            matches.value_of("device-interval").unwrap_or("1000").parse()?,
        ),
        publish_interval: Duration::from_millis(
            matches.value_of("publish-interval").unwrap_or("5000").parse()?,
        ),
        ..BridgeSettings::default()
    };

    // Startup failures from here on are fatal: without a descriptor and a
    // bound endpoint there is nothing to bridge.
    let config_path = matches.value_of("config").unwrap_or(DEFAULT_CONFIG_PATH);
    let cloud_config = CloudConfig::load(Path::new(config_path))?;
    let endpoint = Endpoint::parse(&settings.endpoint_url)?;

    info!("device tick interval: {:?}", settings.device_tick);
    info!("cloud publish interval: {:?}", settings.publish_interval);
    info!("publishing to topic `{}`", cloud_config.topic);

    let store = Arc::new(PointStore::new());
    let device = SimulatedDevice::new(Arc::clone(&store), settings.device_tick);
    device.init().await?;

    let mut registry = sensorbridge::PointRegistry::new();
    let nodes = device.expose(&mut registry)?;
    let server = PointServer::bind(&endpoint, Arc::clone(&store), registry).await?;
    let local_addr = server.local_addr()?;

    let cancel = CancellationToken::new();
    let server_task = tokio::spawn(server.serve(cancel.clone()));
    let device_task = tokio::spawn(device.run(cancel.clone()));

    // The sampler dials the bound port, not the configured one, so an
    // ephemeral-port bind still resolves.
    let client_host = if endpoint.host == "0.0.0.0" {
        "127.0.0.1"
    } else {
        endpoint.host.as_str()
    };
    let sampler = PointSampler::new(
        format!("{client_host}:{}", local_addr.port()),
        nodes,
        settings.operation_timeout,
    );
    let mut link = CloudLink::new(
        cloud_config,
        settings.connect_timeout,
        settings.operation_timeout,
    );
    // A failed first handshake is not fatal; the bridge retries each cycle.
    if let Err(e) = link.connect().await {
        error!("initial cloud connect failed: {}", e);
    }

    let bridge = Bridge::new(sampler, link, settings.publish_interval);
    let bridge_task = tokio::spawn(bridge.run(cancel.clone()));

    println!("📡 Bridge is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    println!();
    info!("shutdown requested");
    cancel.cancel();

    let stats = bridge_task.await?;
    device_task.await?;
    server_task.await?;

    println!(
        "🛑 Sensor bridge stopped ({} cycles, {} messages published)",
        stats.cycles, stats.published
    );
    Ok(())
}

fn validate_ms(value: String) -> Result<(), String> {
    match value.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(()),
        _ => Err("interval must be a positive number of milliseconds".to_string()),
    }
}
