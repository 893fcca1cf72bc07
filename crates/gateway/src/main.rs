#![forbid(unsafe_code)]

mod shutdown;
mod startup;

use std::path::Path;

use anyhow::Result;

use infrastructure::config::GatewayConfig;
use infrastructure::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        Some("--version" | "-V") => {
            println!("alert-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        path => {
            let config_path = path.unwrap_or("config/gateway.yaml");
            let config = GatewayConfig::load(Path::new(config_path))
                .map_err(|e| anyhow::anyhow!("failed to load config '{config_path}': {e}"))?;
            logging::init_logging(config.log.level, config.log.format);
            startup::run(config).await
        }
    }
}

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  alert-gateway [config.yaml]    Start the gateway (default: config/gateway.yaml)");
    eprintln!("  alert-gateway --version        Print the version");
}
