#[tokio::main]
async fn main() -> anyhow::Result<()> {
    coderunner::run().await
}
