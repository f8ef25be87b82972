use httpagent::config::Config;
use httpagent::dispatch::socket::Family;
use httpagent::http::options::{Options, PROTOCOL};
use httpagent::server::ListenAgent;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::load(),
    };

    let agent = ListenAgent::new(cfg.engine.clone())?;
    let mut options = Options::new();
    options.insert(PROTOCOL, cfg.protocol.as_str());
    let listen = agent.connect(&cfg.listen_addr, Family::Any, &options)?;

    listen.on_request(|stream| {
        let (Some(request), Some(response)) = (stream.request(), stream.response()) else {
            return;
        };
        tracing::info!(method = %request.method(), path = %request.path(), "request");
        response.set_header("Content-Type", "text/plain");
        response.set_body(format!("hello from {}\n", request.path()));
        if let Err(e) = stream.write() {
            tracing::warn!(error = %e, "response not queued");
        }
    });
    listen.on_error(|server, reason| {
        tracing::warn!(peer = %server.peer(), reason, "connection failed");
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    agent.reset();

    Ok(())
}
