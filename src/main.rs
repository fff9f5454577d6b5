use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "sidebot-bridge", version, about = "Relay between the Sidebot design plugin and Claude")]
struct Cli {
    /// Port for the HTTP command surface
    #[arg(long, env = "SIDEBOT_HTTP_PORT")]
    http_port: Option<u16>,

    /// Port the plugin connects to over WebSocket
    #[arg(long, env = "SIDEBOT_WS_PORT")]
    ws_port: Option<u16>,

    /// Interface both servers bind to
    #[arg(long, env = "SIDEBOT_HOST")]
    host: Option<String>,

    /// tracing filter, e.g. `debug` or `sidebot_bridge_lib=trace`
    #[arg(long, env = "SIDEBOT_LOG")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    sidebot_bridge_lib::init_tracing(cli.log_level.as_deref());

    sidebot_bridge_lib::run(sidebot_bridge_lib::Overrides {
        http_port: cli.http_port,
        ws_port: cli.ws_port,
        host: cli.host,
    })
    .await
}
