use std::{net::SocketAddrV4, process, time::Duration};

use argh::FromArgs;
use coap_mcast_observe::{server::Server, Error, ServerConfig};
use log::{error, info};

#[derive(FromArgs)]
/// Answers CoAP multicast discovery and serves periodic observe notifications
struct Options {
    /// discovery group to join, default 224.0.1.187:5683
    #[argh(option, default = "String::from(\"224.0.1.187:5683\")")]
    group: String,

    /// unicast port for observers
    #[argh(option, default = "coap_mcast_observe::OBSERVER_PORT")]
    observer_port: u16,

    /// milliseconds between notifications
    #[argh(option, default = "1000")]
    interval: u64,
}

impl Options {
    fn into_config(self) -> Result<ServerConfig, Error> {
        let multicast_addr = self
            .group
            .parse::<SocketAddrV4>()
            .map_err(|_| Error::InvalidAddress(self.group.clone()))?;
        Ok(ServerConfig {
            multicast_addr,
            observer_port: self.observer_port,
            notify_interval: Duration::from_millis(self.interval),
        })
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    let options: Options = argh::from_env();
    let config = match options.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let server = Server::new(config);
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("{}", e);
                process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
}
