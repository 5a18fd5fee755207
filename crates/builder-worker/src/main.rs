// SPDX-License-Identifier: Apache-2.0
//! Distributed build worker binary: connects to a coordinator, announces
//! its capabilities, executes dispatched Actions under the hermetic
//! executor, and reports results and periodic heartbeats back over the
//! same connection (spec.md §4.6-§4.8).

use anyhow::{Context, Result};
use builder_cas::DiskTier;
use builder_config_core::config::ConfigService;
use builder_config_core::settings::BuilderConfig;
use builder_config_fs::FsConfigStore;
use builder_proto::wire::{self, WireError};
use builder_proto::{
    Capabilities, Envelope, HeartBeat, MessageId, Payload, WorkerId, WorkerState, DEFAULT_COORDINATOR_PORT,
};
use builder_sandbox::HermeticExecutor;
use builder_worker::{execute_request, ExecutionSlots, TcpBlobSource, WorkerLoad};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkerPrefs {
    coordinator_addr: String,
    cas_peer_addr: Option<String>,
}

impl Default for WorkerPrefs {
    fn default() -> Self {
        Self {
            coordinator_addr: format!("127.0.0.1:{DEFAULT_COORDINATOR_PORT}"),
            cas_peer_addr: None,
        }
    }
}

const HEARTBEAT_TICK: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = BuilderConfig::from_env();
    let fs_config: Option<ConfigService<FsConfigStore>> = FsConfigStore::new().map(ConfigService::new).ok();
    let prefs: WorkerPrefs = fs_config.as_ref().and_then(|c| c.load::<WorkerPrefs>("worker").ok().flatten()).unwrap_or_default();
    if let Some(cfg) = &fs_config {
        let _ = cfg.save("worker", &prefs);
    }

    std::fs::create_dir_all(&config.cache_dir).with_context(|| format!("creating cache dir {}", config.cache_dir.display()))?;
    let cas_root = config.cache_dir.join("cas");
    let sandbox_root = config.cache_dir.join("sandbox");
    std::fs::create_dir_all(&sandbox_root).with_context(|| format!("creating sandbox dir {}", sandbox_root.display()))?;

    let executor = Arc::new(HermeticExecutor::new(sandbox_root));
    let cas = Arc::new(parking_lot::Mutex::new(DiskTier::open(&cas_root)?));
    let remote = prefs
        .cas_peer_addr
        .as_deref()
        .and_then(|addr| addr.parse::<SocketAddr>().ok())
        .map(TcpBlobSource::new)
        .map(Arc::new);
    let slots = Arc::new(ExecutionSlots::new(u32::try_from(config.parallelism).unwrap_or(1)));
    let load = Arc::new(WorkerLoad::new());

    info!(coordinator = %prefs.coordinator_addr, jobs = slots.capacity(), "connecting to coordinator");
    let stream = TcpStream::connect(&prefs.coordinator_addr)
        .await
        .with_context(|| format!("connecting to coordinator at {}", prefs.coordinator_addr))?;
    let (mut reader, writer) = tokio::io::split(stream);
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);

    let writer_handle = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(bytes) = rx.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let next_message_id = Arc::new(AtomicU64::new(1));
    send_announce(&tx, &next_message_id, &config);

    let heartbeat_handle = tokio::spawn(heartbeat_loop(tx.clone(), next_message_id.clone(), load.clone()));

    let mut read_buf = vec![0_u8; 64 * 1024];
    let mut acc: Vec<u8> = Vec::with_capacity(64 * 1024);
    let mut draining = false;

    loop {
        tokio::select! {
            read = reader.read(&mut read_buf) => {
                let n = read.context("reading from coordinator connection")?;
                if n == 0 {
                    info!("coordinator closed the connection");
                    break;
                }
                acc.extend_from_slice(&read_buf[..n]);
                loop {
                    match wire::decode(&acc) {
                        Ok((envelope, consumed)) => {
                            acc.drain(..consumed);
                            if handle_envelope(envelope, &executor, &cas, &remote, &slots, &load, &tx, &next_message_id).await {
                                draining = true;
                            }
                        }
                        Err(WireError::IncompleteHeader | WireError::IncompleteBody { .. }) => break,
                        Err(error) => {
                            warn!(%error, "framing error from coordinator, dropping connection");
                            acc.clear();
                            break;
                        }
                    }
                }
                if draining && load.active_count() == 0 {
                    break;
                }
            }
            () = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    heartbeat_handle.abort();
    drop(tx);
    let _ = writer_handle.await;
    Ok(())
}

fn send_announce(tx: &mpsc::Sender<Vec<u8>>, next_message_id: &Arc<AtomicU64>, config: &BuilderConfig) {
    let capabilities = Capabilities {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        max_memory_bytes: u64::MAX,
        max_cpu_cores: u32::try_from(config.parallelism).unwrap_or(1),
        allowed_read_roots: vec![],
        allowed_write_roots: vec![],
        allow_network: false,
    };
    let announce = builder_proto::PeerAnnounce {
        worker_id: None,
        address: String::new(),
        capabilities,
    };
    let envelope = Envelope::new(
        MessageId(next_message_id.fetch_add(1, Ordering::Relaxed)),
        WorkerId(0),
        WorkerId::COORDINATOR,
        Payload::PeerAnnounce(announce),
    );
    if let Ok(bytes) = wire::encode(&envelope) {
        let _ = tx.try_send(bytes);
    }
}

async fn heartbeat_loop(tx: mpsc::Sender<Vec<u8>>, next_message_id: Arc<AtomicU64>, load: Arc<WorkerLoad>) {
    let mut ticker = tokio::time::interval(HEARTBEAT_TICK);
    loop {
        ticker.tick().await;
        let heartbeat = HeartBeat {
            state: WorkerState::Alive,
            load: load.snapshot(0.0, 0.0, 0.0),
            active_actions: vec![],
        };
        let envelope = Envelope::new(
            MessageId(next_message_id.fetch_add(1, Ordering::Relaxed)),
            WorkerId(0),
            WorkerId::COORDINATOR,
            Payload::HeartBeat(heartbeat),
        );
        if let Ok(bytes) = wire::encode(&envelope) {
            if tx.send(bytes).await.is_err() {
                break;
            }
        }
    }
}

/// Dispatch one envelope received from the coordinator. Returns `true` if
/// the worker should begin draining (a `Shutdown` was received).
#[allow(clippy::too_many_arguments)]
async fn handle_envelope(
    envelope: Envelope,
    executor: &Arc<HermeticExecutor>,
    cas: &Arc<parking_lot::Mutex<DiskTier>>,
    remote: &Option<Arc<TcpBlobSource>>,
    slots: &Arc<ExecutionSlots>,
    load: &Arc<WorkerLoad>,
    tx: &mpsc::Sender<Vec<u8>>,
    next_message_id: &Arc<AtomicU64>,
) -> bool {
    match envelope.payload {
        Payload::ActionRequest(request) => {
            let executor = executor.clone();
            let cas = cas.clone();
            let remote = remote.clone();
            let slots = slots.clone();
            let load = load.clone();
            let tx = tx.clone();
            let next_message_id = next_message_id.clone();
            tokio::spawn(async move {
                let _permit = slots.acquire().await;
                load.begin();
                let action_id = request.action_id;
                let outcome = execute_request(&executor, &cas, remote.as_deref(), &request).await;
                load.end();
                let result = match outcome {
                    Ok(result) => result,
                    Err(error) => {
                        warn!(%error, action = %action_id, "action could not be executed");
                        return;
                    }
                };
                let envelope = Envelope::new(
                    MessageId(next_message_id.fetch_add(1, Ordering::Relaxed)),
                    WorkerId(0),
                    WorkerId::COORDINATOR,
                    Payload::ActionResult(result),
                );
                if let Ok(bytes) = wire::encode(&envelope) {
                    let _ = tx.send(bytes).await;
                }
            });
            false
        }
        Payload::Shutdown(shutdown) => {
            info!(grace_ms = shutdown.grace_ms, "coordinator requested shutdown, draining in-flight actions");
            true
        }
        Payload::HeartBeat(_) | Payload::PeerAnnounce(_) | Payload::ActionResult(_) | Payload::StealRequest(_) | Payload::StealResponse(_) => {
            warn!("received a worker-to-coordinator payload from the coordinator, ignoring");
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_prefs_point_at_the_standard_coordinator_port() {
        let prefs = WorkerPrefs::default();
        assert_eq!(prefs.coordinator_addr, format!("127.0.0.1:{DEFAULT_COORDINATOR_PORT}"));
        assert_eq!(prefs.cas_peer_addr, None);
    }
}
