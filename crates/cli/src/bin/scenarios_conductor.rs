use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    conductor_cli::main_entry().await
}
