//! Heartbeat monitor: collects stats heartbeats and serves them as JSON.
//!
//! A UDP listener decodes every datagram with [`decode_stats`] and folds it
//! into a per-sender [`HostTable`].  An axum router exposes the table at
//! `GET /hosts`.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::payload::{decode_stats, StatsSnapshot};

pub const HTTP_BIND_DEFAULT: &str = "0.0.0.0:8080";

/// A host is online if a heartbeat arrived within this window.
pub const ONLINE_WINDOW: Duration = Duration::from_secs(20);

const LOOPBACK: &str = "lo";

// ---------------------------------------------------------------------------
// Snapshot parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Parse the leading three fields of a `/proc/loadavg` line.
pub fn parse_loadavg(text: &str) -> Option<LoadAverage> {
    let mut fields = text.split_whitespace().map(str::parse::<f64>);
    Some(LoadAverage {
        one: fields.next()?.ok()?,
        five: fields.next()?.ok()?,
        fifteen: fields.next()?.ok()?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Byte counters per interface from `/proc/net/dev` text.
///
/// The loopback interface, header lines and lines cut short (the heartbeat
/// may clip the text) are skipped.
pub fn parse_net_dev(text: &str) -> BTreeMap<String, Counters> {
    text.lines()
        .filter_map(|line| {
            let (name, rest) = line.split_once(':')?;
            if name.trim() == LOOPBACK {
                return None;
            }
            let fields: Vec<u64> = rest
                .split_whitespace()
                .map(str::parse)
                .collect::<Result<_, _>>()
                .ok()?;
            if fields.len() < 9 {
                return None;
            }
            Some((
                name.trim().to_string(),
                Counters {
                    rx_bytes: fields[0],
                    tx_bytes: fields[8],
                },
            ))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// HostTable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InterfaceView {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// Bytes/second since the previous heartbeat; absent on the first
    /// heartbeat or after a counter reset.
    pub rx_rate: Option<f64>,
    pub tx_rate: Option<f64>,
}

#[derive(Debug)]
struct HostState {
    os: String,
    load: Option<LoadAverage>,
    interfaces: BTreeMap<String, InterfaceView>,
    last_seen: Instant,
    last_seen_at: DateTime<Utc>,
    heartbeats: u64,
}

/// JSON shape of one reporting host.
#[derive(Debug, Clone, Serialize)]
pub struct HostView {
    pub address: IpAddr,
    pub os: String,
    pub load: Option<LoadAverage>,
    pub interfaces: BTreeMap<String, InterfaceView>,
    pub last_seen: DateTime<Utc>,
    pub online: bool,
    pub heartbeats: u64,
}

/// Latest known state of every host that sent a heartbeat.
#[derive(Debug, Default)]
pub struct HostTable {
    hosts: HashMap<IpAddr, HostState>,
}

pub type SharedTable = Arc<RwLock<HostTable>>;

fn rate(current: u64, previous: u64, elapsed: f64) -> Option<f64> {
    (current >= previous && elapsed > 0.0).then(|| (current - previous) as f64 / elapsed)
}

impl HostTable {
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Fold one decoded heartbeat from `addr` into the table.
    pub fn record(&mut self, addr: IpAddr, snapshot: &StatsSnapshot, now: Instant, wall: DateTime<Utc>) {
        let counters = parse_net_dev(&snapshot.net);
        let previous = self.hosts.get(&addr);

        let interfaces = counters
            .into_iter()
            .map(|(name, c)| {
                let before = previous.and_then(|p| {
                    let elapsed = now.saturating_duration_since(p.last_seen).as_secs_f64();
                    p.interfaces.get(&name).map(|i| (i, elapsed))
                });
                let view = InterfaceView {
                    rx_bytes: c.rx_bytes,
                    tx_bytes: c.tx_bytes,
                    rx_rate: before.and_then(|(i, dt)| rate(c.rx_bytes, i.rx_bytes, dt)),
                    tx_rate: before.and_then(|(i, dt)| rate(c.tx_bytes, i.tx_bytes, dt)),
                };
                (name, view)
            })
            .collect();

        let heartbeats = previous.map_or(0, |p| p.heartbeats) + 1;
        self.hosts.insert(
            addr,
            HostState {
                os: snapshot.os.clone(),
                load: parse_loadavg(&snapshot.cpu),
                interfaces,
                last_seen: now,
                last_seen_at: wall,
                heartbeats,
            },
        );
    }

    /// Every host, ordered by address.
    pub fn view(&self, now: Instant) -> Vec<HostView> {
        let mut hosts: Vec<HostView> = self
            .hosts
            .iter()
            .map(|(addr, state)| HostView {
                address: *addr,
                os: state.os.clone(),
                load: state.load,
                interfaces: state.interfaces.clone(),
                last_seen: state.last_seen_at,
                online: now.saturating_duration_since(state.last_seen) <= ONLINE_WINDOW,
                heartbeats: state.heartbeats,
            })
            .collect();
        hosts.sort_by_key(|h| h.address);
        hosts
    }
}

// ---------------------------------------------------------------------------
// UDP listener
// ---------------------------------------------------------------------------

/// Receive heartbeats on `socket` forever, recording each into `table`.
pub async fn listen(socket: UdpSocket, table: SharedTable) {
    let mut buf = [0u8; 65536];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "heartbeat recv_from error");
                continue;
            }
        };
        match decode_stats(&buf[..len]) {
            Ok(snapshot) => {
                debug!(%peer, os = %snapshot.os, "heartbeat received");
                table
                    .write()
                    .await
                    .record(peer.ip(), &snapshot, Instant::now(), Utc::now());
            }
            Err(e) => debug!(%peer, len, error = %e, "ignoring malformed heartbeat"),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

async fn hosts_handler(State(table): State<SharedTable>) -> Json<Vec<HostView>> {
    Json(table.read().await.view(Instant::now()))
}

async fn fallback() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

pub fn router(table: SharedTable) -> Router {
    Router::new()
        .route("/hosts", get(hosts_handler))
        .fallback(fallback)
        .with_state(table)
}

/// Run the monitor until `shutdown` resolves.
pub async fn serve(
    udp_port: u16,
    http_bind: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let udp_addr = format!("0.0.0.0:{}", udp_port);
    let socket = UdpSocket::bind(&udp_addr)
        .await
        .with_context(|| format!("failed to bind heartbeat socket on {}", udp_addr))?;
    let listener = tokio::net::TcpListener::bind(http_bind)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", http_bind))?;

    let table = SharedTable::default();
    let receiver = tokio::spawn(listen(socket, table.clone()));

    info!(udp_port, %http_bind, "heartbeat monitor listening");
    let served = axum::serve(listener, router(table))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed");

    receiver.abort();
    info!("heartbeat monitor stopped");
    served
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
