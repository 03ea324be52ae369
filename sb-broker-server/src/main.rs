//! sb-broker server binary: wires the connection engine (`sb-broker-core`)
//! onto a `tokio` current-thread runtime (§5, SPEC_FULL §5).
//!
//! Everything in this crate is "ambient stack" per SPEC_FULL §4.10 —
//! argument parsing, key loading, the accept loop, and the reference
//! [`api::ForwardingApi`] — the protocol engine itself lives in
//! `sb-broker-proto`/`sb-broker-core`.

mod api;
mod config;
mod keys;

use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing::{error, info, warn};

use sb_broker_core::Broker;
use sb_broker_proto::TunnelPhase;

use api::ForwardingApi;
use config::Config;

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    let local = LocalSet::new();
    match local.block_on(&runtime, serve(config)) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server exited with error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server_longterm = keys::load_server_longterm(&config.keys_dir)?;

    let api = ForwardingApi::new();
    let broker = Rc::new(Broker::with_queue_drain_batch(
        api.clone(),
        server_longterm,
        config.queue_drain_batch,
    ));
    api.bind(&broker);

    spawn_minute_key_timer(broker.clone());

    let listener = TcpListener::bind(&config.listen).await?;
    info!(listen = %config.listen, "sb-broker listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "accepted connection");
        let broker = broker.clone();
        tokio::task::spawn_local(async move {
            if let Err(e) = handle_connection(broker, stream).await {
                warn!(%peer, error = %e, "connection task ended");
            }
        });
    }
}

/// Drives one peer's lifetime: a writer task drains the connection's
/// outbound channel (fed by `Broker::write_record` internally) while this
/// task reads, feeding bytes through the handshake or established framer
/// (§4.4) and draining the event queue in bounded batches (§4.7).
async fn handle_connection(broker: Rc<Broker>, stream: TcpStream) -> std::io::Result<()> {
    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let con = broker.create_connection(tx);

    tokio::task::spawn_local(async move {
        while let Some(bytes) = rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut buf = vec![0u8; 8192];
    loop {
        let n = read_half.read(&mut buf).await?;
        if n == 0 {
            broker.connection_close(&con);
            return Ok(());
        }

        let phase = con.borrow().tunnel.phase();
        match phase {
            TunnelPhase::Established => {
                broker.drive_established(&con, &buf[..n]);
                while broker.has_pending_events(&con) {
                    broker.drain_pending_events(&con);
                    tokio::task::yield_now().await;
                }
            }
            TunnelPhase::Initial | TunnelPhase::CookieSent => {
                if let Some(reply) = broker.drive_handshake(&con, &buf[..n]) {
                    let tx = con.borrow().outbound_tx.clone();
                    let _ = tx.send(reply);
                }
            }
        }

        if con.borrow().closed {
            return Ok(());
        }
    }
}

/// Rotates the minute key every 60s (§4.1). The first tick fires
/// immediately on most platforms; it is consumed unused so rotation starts
/// a full interval after boot, matching a freshly-created `MinuteKeyRing`'s
/// already-random `current`/`previous` pair.
fn spawn_minute_key_timer(broker: Rc<Broker>) {
    tokio::task::spawn_local(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.tick().await;
        loop {
            interval.tick().await;
            broker.rotate_minute_key();
        }
    });
}
