use clap::Parser;
use lmdis::config::Config;
use lmdis::{server, Error};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::parse();

    server::run(config).await
}
