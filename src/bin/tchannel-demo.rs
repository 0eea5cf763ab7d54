use tracing::Level;

use tchannel_rs::cli::COMMAND;
use tchannel_rs::{CallOptions, Channel, Options};

#[tokio::main]
async fn main() {
    let log_filter = if COMMAND.debug() { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(log_filter).init();

    let channel = Channel::new(Options::default());
    channel
        .register("echo", |req| async move { (true, req.arg2, req.arg3) })
        .expect("fresh channel always accepts its first registration");

    let addr = channel
        .listen(COMMAND.host(), COMMAND.port())
        .await
        .expect("failed to bind");
    channel.set_local_host_port(addr.to_string());
    info!(%addr, "listening");

    if let Some(peer) = COMMAND.peer() {
        let opts = CallOptions {
            arg1: b"echo".to_vec(),
            arg2: b"demo-key".to_vec(),
            arg3: b"demo-value".to_vec(),
            timeout: Some(COMMAND.timeout()),
        };
        match channel.request(peer, opts).await {
            Ok(resp) => info!(
                ok = resp.ok,
                arg2 = %String::from_utf8_lossy(&resp.arg2),
                arg3 = %String::from_utf8_lossy(&resp.arg3),
                "call completed"
            ),
            Err(e) => error!(error = %e, "call failed"),
        }
    }

    tokio::signal::ctrl_c().await.ok();
    channel.close().await.ok();
}
