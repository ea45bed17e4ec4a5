//! vhal-demo - Exercise the vehicle property client against the mock service
//!
//! Reads, increments or watches one vendor property, the way an in-vehicle
//! app would talk to the property service.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vhal_client::{
    ClientConfig, MockTransport, PropertyClient, PropertyEvent, PropertyValue, TransportConfig,
};
use vhal_core::{AreaId, PropertyId, PropertyKey, SampleRate};

#[derive(Parser)]
#[command(name = "vhal-demo")]
#[command(author, version, about = "Vehicle property client demo")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "VHAL_CONFIG")]
    config: Option<PathBuf>,

    /// Property ID (hex with 0x prefix, or decimal)
    #[arg(short, long, default_value = "0x21400001", value_parser = parse_id)]
    property: i32,

    /// Area ID, or "global"
    #[arg(short, long, default_value = "global", value_parser = parse_area)]
    area: i32,

    /// Print values as JSON
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the property once
    Read,

    /// Read the property, add one, write it and read it back
    Increment,

    /// Print change events while a background writer bumps the value
    Watch {
        /// How long to watch
        #[arg(long, default_value = "5")]
        seconds: u64,
    },
}

fn parse_id(s: &str) -> Result<i32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).map(|v| v as i32),
        None => s.parse::<i32>(),
    };
    parsed.map_err(|e| format!("invalid id '{}': {}", s, e))
}

fn parse_area(s: &str) -> Result<i32, String> {
    if s.eq_ignore_ascii_case("global") {
        Ok(AreaId::GLOBAL.value())
    } else {
        parse_id(s)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("vhal_demo=debug,vhal_client=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "vhal_demo=info,vhal_client=info".into())
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    let key = PropertyKey::new(PropertyId(cli.property), AreaId(cli.area));

    let TransportConfig::Mock(mock_config) = &config.transport;
    let mock = Arc::new(MockTransport::new(mock_config));
    if mock.stored(&key).is_none() {
        mock.push_value(key, 0);
    }
    let client = PropertyClient::new(config, mock.clone());

    client.connect().await.context("Failed to connect")?;
    client
        .wait_ready(client.config().connect_timeout())
        .await
        .context("Property service did not become ready")?;
    info!(property = %key, "Connected to property service");

    let result = match cli.command {
        Commands::Read => read(&client, key, cli.json).await,
        Commands::Increment => increment(&client, key, cli.json).await,
        Commands::Watch { seconds } => watch(&client, &mock, key, seconds, cli.json).await,
    };

    client.shutdown().await;
    result
}

async fn read(client: &PropertyClient, key: PropertyKey, json: bool) -> Result<()> {
    match client.get(key).await {
        Ok(value) => print_value(&value, json),
        Err(e) if e.is_unavailable() => {
            println!("{} unavailable", key);
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", key)),
    }
}

async fn increment(client: &PropertyClient, key: PropertyKey, json: bool) -> Result<()> {
    let before = client
        .get_i32(key)
        .await
        .with_context(|| format!("Failed to read {}", key))?;
    client
        .set_i32(key, before.wrapping_add(1))
        .await
        .with_context(|| format!("Failed to write {}", key))?;

    let after = client.get(key).await?;
    info!(property = %key, before, after = %after.value(), "Incremented");
    print_value(&after, json)
}

async fn watch(
    client: &PropertyClient,
    mock: &Arc<MockTransport>,
    key: PropertyKey,
    seconds: u64,
    json: bool,
) -> Result<()> {
    let (handle, mut rx) = client.subscribe_channel(key, SampleRate::NORMAL).await?;

    let writer = tokio::spawn({
        let mock = mock.clone();
        async move {
            let mut next = mock.stored(&key).and_then(|v| v.as_i32()).unwrap_or(0);
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                next = next.wrapping_add(1);
                mock.push_value(key, next);
            }
        }
    });

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = rx.recv() => match event {
                Some(PropertyEvent::Change(value)) => print_value(&value, json)?,
                Some(PropertyEvent::Error { key, code }) => {
                    warn!(property = %key, %code, "Property error event");
                }
                None => break,
            },
        }
    }

    writer.abort();
    client.unsubscribe(handle).await;

    let stats = client.delivery_stats();
    info!(
        delivered = stats.delivered,
        failures = stats.listener_failures,
        "Watch finished"
    );
    if json {
        println!("{}", serde_json::to_string(&stats)?);
    }
    Ok(())
}

fn print_value(value: &PropertyValue, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!(
            "{} = {} ({})",
            value.key(),
            value.value(),
            value.value().value_type()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("0x21400001"), Ok(0x2140_0001));
        assert_eq!(parse_id("42"), Ok(42));
        assert_eq!(parse_id("0xF0000001"), Ok(0xF000_0001u32 as i32));
        assert!(parse_id("zz").is_err());
    }

    #[test]
    fn test_parse_area() {
        assert_eq!(parse_area("global"), Ok(0));
        assert_eq!(parse_area("GLOBAL"), Ok(0));
        assert_eq!(parse_area("0x31"), Ok(0x31));
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["vhal-demo", "read"]);
        assert_eq!(cli.property, 0x2140_0001);
        assert_eq!(cli.area, 0);
        assert!(matches!(cli.command, Commands::Read));
    }
}
