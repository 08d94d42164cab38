#[tokio::main]
async fn main() {
    if let Err(e) = onward::server::run().await {
        eprintln!("onward-server: {e}");
        std::process::exit(1);
    }
}
