use bytes::Bytes;
use clap::Parser;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{error, info};

use lmdis::config::DEFAULT_PORT;
use lmdis::connection::Connection;
use lmdis::frame::Frame;
use lmdis::Error;

/// Measures the throughput of a running server with concurrent clients issuing SET and GET pairs.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Number of concurrent connections
    #[arg(short, long, default_value_t = 50)]
    clients: usize,

    /// SET and GET pairs issued by every connection
    #[arg(short, long, default_value_t = 1000)]
    requests: usize,

    /// Size in bytes of the values written
    #[arg(long, default_value_t = 64)]
    value_size: usize,
}

fn request(parts: Vec<Bytes>) -> Frame {
    Frame::Array(parts.into_iter().map(Frame::Bulk).collect())
}

async fn run_client(args: &Args, client: usize) -> Result<(), Error> {
    let stream = TcpStream::connect((args.host.as_str(), args.port)).await?;
    let mut conn = Connection::client(stream);
    let value = Bytes::from(vec![b'x'; args.value_size]);

    for i in 0..args.requests {
        let key = Bytes::from(format!("benchmark:{client}:{i}"));

        conn.write_frame(request(vec![
            Bytes::from("SET"),
            key.clone(),
            value.clone(),
        ]))
        .await?;
        match conn.read_frame().await? {
            Some(Frame::Simple(_)) => {}
            reply => return Err(format!("unexpected SET reply: {reply:?}").into()),
        }

        conn.write_frame(request(vec![Bytes::from("GET"), key])).await?;
        match conn.read_frame().await? {
            Some(Frame::Bulk(_)) => {}
            reply => return Err(format!("unexpected GET reply: {reply:?}").into()),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt().init();

    let args = std::sync::Arc::new(Args::parse());
    info!(
        clients = args.clients,
        requests = args.requests,
        "Starting benchmark against {}:{}",
        args.host,
        args.port
    );

    let start = Instant::now();
    let mut tasks = JoinSet::new();
    for client in 0..args.clients {
        let args = args.clone();
        tasks.spawn(async move { run_client(&args, client).await });
    }

    let mut failed = 0;
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(%e, "Client failed");
                failed += 1;
            }
            Err(e) => {
                error!(%e, "Client task panicked");
                failed += 1;
            }
        }
    }

    let elapsed = start.elapsed();
    let operations = (args.clients - failed) * args.requests * 2;
    info!(
        operations,
        failed,
        elapsed_ms = elapsed.as_millis() as u64,
        ops_per_sec = operations as f64 / elapsed.as_secs_f64(),
        "Benchmark finished"
    );

    Ok(())
}
