// SPDX-License-Identifier: Apache-2.0
//! Distributed build coordinator binary: accepts worker connections,
//! dispatches Actions, and sweeps worker health (spec.md §4.6-§4.7).

use anyhow::Result;
use builder_config_core::config::ConfigService;
use builder_config_fs::FsConfigStore;
use builder_coordinator::Coordinator;
use builder_proto::wire::{self, WireError};
use builder_proto::{Capabilities, Envelope, Payload, WorkerId, DEFAULT_COORDINATOR_PORT};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CoordinatorPrefs {
    port: u16,
}

impl Default for CoordinatorPrefs {
    fn default() -> Self {
        Self { port: DEFAULT_COORDINATOR_PORT }
    }
}

const DISPATCH_TICK: Duration = Duration::from_millis(200);
const HEALTH_SWEEP_TICK: Duration = Duration::from_secs(2);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config: Option<ConfigService<FsConfigStore>> = FsConfigStore::new().map(ConfigService::new).ok();
    let prefs: CoordinatorPrefs = config.as_ref().and_then(|c| c.load::<CoordinatorPrefs>("coordinator").ok().flatten()).unwrap_or_default();
    if let Some(cfg) = &config {
        let _ = cfg.save("coordinator", &prefs);
    }

    let coordinator = Arc::new(Coordinator::default());

    let listener = TcpListener::bind(("0.0.0.0", prefs.port)).await?;
    info!(port = prefs.port, "coordinator listening");

    let dispatch_handle = tokio::spawn(dispatch_loop(coordinator.clone()));
    let health_handle = tokio::spawn(health_loop(coordinator.clone()));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    if let Err(error) = handle_connection(stream, peer.to_string(), coordinator).await {
                        warn!(%error, %peer, "worker connection ended with an error");
                    }
                });
            }
            () = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, draining workers");
                break;
            }
        }
    }

    dispatch_handle.abort();
    health_handle.abort();
    shutdown_workers(&coordinator).await;
    Ok(())
}

async fn dispatch_loop(coordinator: Arc<Coordinator>) {
    let mut ticker = tokio::time::interval(DISPATCH_TICK);
    loop {
        ticker.tick().await;
        let dispatched = coordinator.dispatch_tick();
        if dispatched > 0 {
            info!(dispatched, "dispatch tick");
        }
    }
}

async fn health_loop(coordinator: Arc<Coordinator>) {
    let mut ticker = tokio::time::interval(HEALTH_SWEEP_TICK);
    loop {
        ticker.tick().await;
        coordinator.sweep();
    }
}

async fn shutdown_workers(coordinator: &Arc<Coordinator>) {
    let grace_ms = u64::try_from(SHUTDOWN_GRACE.as_millis()).unwrap_or(u64::MAX);
    coordinator.broadcast_shutdown(grace_ms);
    tokio::time::sleep(SHUTDOWN_GRACE).await;
}

async fn handle_connection(stream: TcpStream, peer: String, coordinator: Arc<Coordinator>) -> Result<()> {
    let (mut reader, writer) = tokio::io::split(stream);
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);

    tokio::spawn(async move {
        let mut writer = writer;
        while let Some(bytes) = rx.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut worker_id: Option<WorkerId> = None;
    let mut read_buf = vec![0_u8; 64 * 1024];
    let mut acc: Vec<u8> = Vec::with_capacity(64 * 1024);

    loop {
        let n = reader.read(&mut read_buf).await?;
        if n == 0 {
            break;
        }
        acc.extend_from_slice(&read_buf[..n]);

        loop {
            match wire::decode(&acc) {
                Ok((envelope, consumed)) => {
                    acc.drain(..consumed);
                    worker_id = handle_envelope(envelope, worker_id, &peer, &coordinator, &tx).await;
                }
                Err(WireError::IncompleteHeader | WireError::IncompleteBody { .. }) => break,
                Err(error) => {
                    warn!(%error, %peer, "framing error, dropping connection");
                    acc.clear();
                    if let Some(id) = worker_id {
                        coordinator.reclaim_worker(id);
                    }
                    return Ok(());
                }
            }
        }
    }

    if let Some(id) = worker_id {
        warn!(worker = id.0, %peer, "worker connection closed, reclaiming in-progress work");
        coordinator.reclaim_worker(id);
    }
    Ok(())
}

async fn handle_envelope(envelope: Envelope, worker_id: Option<WorkerId>, peer: &str, coordinator: &Arc<Coordinator>, tx: &mpsc::Sender<Vec<u8>>) -> Option<WorkerId> {
    match envelope.payload {
        Payload::PeerAnnounce(announce) => {
            let capabilities: Capabilities = announce.capabilities;
            let assigned = coordinator.connect_worker(announce.worker_id, announce.address, capabilities, tx.clone());
            info!(worker = assigned.0, %peer, "worker announced");
            Some(assigned)
        }
        Payload::HeartBeat(heartbeat) => {
            if let Some(id) = worker_id {
                coordinator.heartbeat(id, envelope.message_id.0, &heartbeat);
            } else {
                warn!(%peer, "heartbeat received before announce, ignoring");
            }
            worker_id
        }
        Payload::ActionResult(result) => {
            if let Some(id) = worker_id {
                coordinator.complete(id, &result);
            } else {
                warn!(%peer, "action result received before announce, ignoring");
            }
            worker_id
        }
        Payload::StealRequest(_) | Payload::StealResponse(_) => {
            // Peer-to-peer stealing is mediated centrally by dispatch's
            // load-factor redirect; the coordinator does not forward these.
            worker_id
        }
        Payload::ActionRequest(_) | Payload::Shutdown(_) => {
            warn!(%peer, "received a coordinator-to-worker payload from a worker, ignoring");
            worker_id
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_prefs_use_the_standard_coordinator_port() {
        assert_eq!(CoordinatorPrefs::default().port, DEFAULT_COORDINATOR_PORT)
    }
}
