//! `vsock-proxy` entry point.

#[tokio::main]
async fn main() {
    if let Err(e) = vsock_proxy_server::run().await {
        eprintln!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}
