#[tokio::main]
async fn main() -> anyhow::Result<()> {
    adaptive_engine_backend::run().await
}
