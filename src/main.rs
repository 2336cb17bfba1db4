mod geo;
mod server;
mod spot;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    server::start_server().await
}
