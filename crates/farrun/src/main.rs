//! Serve one farrun session over stdio or a single TCP connection.

use std::io;
use std::net::SocketAddr;
use std::net::TcpListener;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use farrun::Executor;

#[derive(Parser, Debug)]
#[command(name = "farrun", version, about = "Remote executor for the farrun protocol")]
struct Args {
    /// Accept a single TCP connection on this address instead of serving
    /// stdin/stdout.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

fn main() -> anyhow::Result<()> {
    // In stdio mode stdout is the wire, so diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut executor = Executor::new().context("task engine setup")?;

    match args.listen {
        Some(addr) => {
            let listener = TcpListener::bind(addr).with_context(|| format!("bind {}", addr))?;
            info!(%addr, "listening");
            let (stream, peer) = listener.accept().context("accept")?;
            info!(%peer, "session start");
            let reader = stream.try_clone().context("clone stream")?;
            executor.serve(reader, stream)?;
        }
        None => {
            let stdin = io::stdin();
            let stdout = io::stdout();
            executor.serve(stdin.lock(), stdout.lock())?;
        }
    }

    Ok(())
}
