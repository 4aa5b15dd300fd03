use std::{process, time::Duration};

use argh::FromArgs;
use coap_mcast_observe::{
    client::{discover, observer_addr, Connection},
    config::parse_addr,
    ClientConfig, Error, Result,
};
use log::{error, info, warn};

#[derive(FromArgs)]
/// Discovers a CoAP server over multicast and observes one of its resources
struct Options {
    /// discovery group, default 224.0.1.187:5683
    #[argh(option, default = "String::from(\"224.0.1.187:5683\")")]
    group: String,

    /// seconds to wait for a discovery answer
    #[argh(option, default = "3")]
    discovery_timeout: u64,

    /// port the selected device serves observations on
    #[argh(option, default = "coap_mcast_observe::OBSERVER_PORT")]
    observer_port: u16,

    /// resource to observe
    #[argh(option, default = "String::from(\"/observe\")")]
    path: String,

    /// seconds allowed for opening the unicast connection
    #[argh(option, default = "30")]
    connection_timeout: u64,
}

impl Options {
    fn into_config(self) -> Result<ClientConfig> {
        Ok(ClientConfig {
            multicast_addr: parse_addr(&self.group)?,
            discovery_timeout: Duration::from_secs(self.discovery_timeout),
            observer_port: self.observer_port,
            observe_path: self.path,
            connection_timeout: Duration::from_secs(self.connection_timeout),
            ..ClientConfig::default()
        })
    }
}

async fn run(config: ClientConfig) -> Result<()> {
    info!("Discovering devices...");
    let device = discover(
        config.multicast_addr,
        &config.discovery_path,
        config.discovery_timeout,
        |_, _| {},
    )
    .await
    .map_err(|e| {
        if let Error::Timeout = e {
            warn!("No non-local devices found");
        }
        e
    })?;
    info!("Selected device: {}", device);

    let conn = Connection::dial(
        observer_addr(device, config.observer_port),
        config.transmission,
        config.connection_timeout,
    )
    .await?;

    info!("Starting observation...");
    println!("Press Ctrl+C to exit");
    let observation = conn
        .observe(&config.observe_path, move |notification| {
            match std::str::from_utf8(&notification.message.payload) {
                Ok(body) => info!("Message from {}: {}", device, body),
                Err(e) => warn!("Error reading body: {}", e),
            }
        })
        .await?;

    tokio::signal::ctrl_c().await?;
    if let Err(e) = observation.cancel(config.cancel_timeout).await {
        warn!("Cannot cancel observation: {}", e);
    }
    conn.close();
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    let options: Options = argh::from_env();
    let result = match options.into_config() {
        Ok(config) => run(config).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}
