#[tokio::main]
async fn main() {
    if let Err(e) = leira_sync::run().await {
        log::error!("{}", e);
        eprintln!("FATAL: {}", e);
        std::process::exit(1);
    }
}
