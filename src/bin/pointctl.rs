use clap::{App, Arg, SubCommand};
use colored::*;
use sensorbridge::server::{PointInfo, PointRequest, PointResponse};
use sensorbridge::Endpoint;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_ENDPOINT: &str = "opc.tcp://127.0.0.1:4840/sensor-sim/";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("pointctl")
        .version("0.1.0")
        .author("Industrial Systems Engineering Team")
        .about("🔧 Operator tool for the simulated sensor's protocol endpoint")
        .arg(
            Arg::with_name("endpoint")
                .short("e")
                .long("endpoint")
                .value_name("URL")
                .help("Protocol endpoint URL")
                .takes_value(true)
                .default_value(DEFAULT_ENDPOINT)
                .global(true),
        )
        .subcommand(SubCommand::with_name("points").about("📋 List all exposed points"))
        .subcommand(
            SubCommand::with_name("read")
                .about("📖 Read the current value of a point")
                .arg(Arg::with_name("point").help("Point name").required(true)),
        )
        .subcommand(
            SubCommand::with_name("write")
                .about("✏️  Write a value to a writable point")
                .arg(Arg::with_name("point").help("Point name").required(true))
                .arg(
                    Arg::with_name("value")
                        .help("New value")
                        .required(true)
                        .validator(|v| {
                            v.parse::<f64>()
                                .map(|_| ())
                                .map_err(|_| "value must be a number".to_string())
                        }),
                ),
        )
        .subcommand(
            SubCommand::with_name("watch")
                .about("👀 Poll a point and print each reading")
                .arg(Arg::with_name("point").help("Point name").required(true))
                .arg(
                    Arg::with_name("interval")
                        .long("interval")
                        .value_name("MS")
                        .help("Poll interval in milliseconds")
                        .takes_value(true)
                        .default_value("1000"),
                ),
        )
        .get_matches();

    let endpoint = Endpoint::parse(matches.value_of("endpoint").unwrap_or(DEFAULT_ENDPOINT))?;
    let addr = endpoint.client_addr();

    match matches.subcommand() {
        ("points", _) => {
            let points = browse(&addr).await?;
            println!("{}", "📋 Exposed points".bright_blue().bold());
            for point in points {
                let access = if point.writable { "rw" } else { "ro" };
                println!(
                    "   {} [{}] {} = {:.2}",
                    point.node.dimmed(),
                    access,
                    point.name.bold(),
                    point.value
                );
            }
        }
        ("read", Some(sub)) => {
            let name = sub.value_of("point").unwrap_or_default();
            let info = find_point(&addr, name).await?;
            let value = read_node(&addr, &info.node).await?;
            println!("{} {} = {:.2}", "✅".green(), name.bold(), value);
        }
        ("write", Some(sub)) => {
            let name = sub.value_of("point").unwrap_or_default();
            let value: f64 = sub.value_of("value").unwrap_or("0").parse()?;
            let info = find_point(&addr, name).await?;
            let response = request(
                &addr,
                &PointRequest::Write {
                    node: info.node.clone(),
                    value,
                },
            )
            .await?;
            if response.ok {
                println!("{} {} = {:.2}", "✅".green(), name.bold(), value);
            } else {
                let reason = response.error.unwrap_or_else(|| "unspecified".to_string());
                println!("{} {}", "❌".red(), reason.bright_red());
                std::process::exit(1);
            }
        }
        ("watch", Some(sub)) => {
            let name = sub.value_of("point").unwrap_or_default();
            let interval_ms: u64 = sub.value_of("interval").unwrap_or("1000").parse()?;
            let info = find_point(&addr, name).await?;
            println!(
                "{} watching {} every {} ms (Ctrl+C to stop)",
                "👀".bright_blue(),
                name.bold(),
                interval_ms
            );
            loop {
                match read_node(&addr, &info.node).await {
                    Ok(value) => println!("   {} = {:.2}", name.bold(), value),
                    Err(e) => println!("{} {}", "❌".red(), e.to_string().bright_red()),
                }
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
            }
        }
        _ => {
            println!("{}", "No command given. Try `pointctl --help`.".yellow());
        }
    }

    Ok(())
}

async fn request(
    addr: &str,
    request: &PointRequest,
) -> Result<PointResponse, Box<dyn std::error::Error>> {
    let stream = TcpStream::connect(addr).await?;
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let payload = serde_json::to_string(request)?;
    writer.write_all(payload.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    let mut line = String::new();
    reader.read_line(&mut line).await?;
    Ok(serde_json::from_str(line.trim())?)
}

async fn browse(addr: &str) -> Result<Vec<PointInfo>, Box<dyn std::error::Error>> {
    let response = request(addr, &PointRequest::Browse).await?;
    if !response.ok {
        let reason = response.error.unwrap_or_else(|| "unspecified".to_string());
        return Err(format!("browse failed: {reason}").into());
    }
    Ok(response.points.unwrap_or_default())
}

async fn find_point(addr: &str, name: &str) -> Result<PointInfo, Box<dyn std::error::Error>> {
    let points = browse(addr).await?;
    points
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| format!("no point named `{name}`").into())
}

async fn read_node(addr: &str, node: &str) -> Result<f64, Box<dyn std::error::Error>> {
    let response = request(
        addr,
        &PointRequest::Read {
            node: node.to_string(),
        },
    )
    .await?;
    if !response.ok {
        let reason = response.error.unwrap_or_else(|| "unspecified".to_string());
        return Err(format!("read failed: {reason}").into());
    }
    response
        .value
        .ok_or_else(|| "response carries no value".into())
}
