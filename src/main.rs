#[tokio::main]
async fn main() -> anyhow::Result<()> {
    archive_catalog::run().await
}
