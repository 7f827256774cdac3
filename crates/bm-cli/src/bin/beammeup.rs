#[tokio::main]
async fn main() {
    std::process::exit(bm_cli::run().await);
}
