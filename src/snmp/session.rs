use super::ber::{Message, Oid, Pdu, PduKind, SnmpVersion, VarBind};
use rand::random;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

const MAX_DATAGRAM_SIZE: usize = 65_535;
// SNMPv1 agents answer a GET-NEXT past the end of their MIB with noSuchName.
const NO_SUCH_NAME: i64 = 2;

#[derive(Debug, Error)]
pub enum SnmpError {
    #[error("could not resolve target {0}")]
    Resolve(String),
    #[error("unsupported SNMP version '{0}'")]
    UnsupportedVersion(String),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no response after {attempts} attempt(s) of {timeout:?}")]
    Timeout { attempts: u32, timeout: Duration },
    #[error("agent returned error-status {status} at index {index}")]
    Agent { status: i64, index: i64 },
}

/// A walk that stopped early, with the bindings received before the failure.
#[derive(Debug, Error)]
#[error("{source} after {} row(s)", .rows.len())]
pub struct WalkError {
    pub rows: Vec<VarBind>,
    #[source]
    pub source: SnmpError,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub timeout: Duration,
    pub retries: u32,
    pub max_repetitions: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1500),
            retries: 0,
            max_repetitions: 50,
        }
    }
}

/// Maps the catalog's version string onto a wire version.
///
/// Unknown strings fall back to v2c. SNMPv3 needs a security model this
/// poller does not implement, so it is refused.
pub fn resolve_version(version: &str) -> Result<SnmpVersion, SnmpError> {
    match version.trim().to_ascii_lowercase().as_str() {
        "1" | "v1" => Ok(SnmpVersion::V1),
        "2" | "2c" | "v2" | "v2c" => Ok(SnmpVersion::V2c),
        "3" | "v3" => Err(SnmpError::UnsupportedVersion(version.to_string())),
        _ => Ok(SnmpVersion::V2c),
    }
}

/// One UDP conversation with a single agent.
pub struct SnmpSession {
    socket: UdpSocket,
    target: SocketAddr,
    version: SnmpVersion,
    community: Vec<u8>,
    options: SessionOptions,
    request_ids: AtomicI32,
}

impl SnmpSession {
    pub async fn connect(
        host: &str,
        port: u16,
        version: SnmpVersion,
        community: &str,
        options: SessionOptions,
    ) -> Result<Self, SnmpError> {
        let target = lookup_host((host, port))
            .await
            .map_err(|e| SnmpError::Resolve(format!("{host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| SnmpError::Resolve(format!("{host}:{port}")))?;

        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;

        Ok(Self {
            socket,
            target,
            version,
            community: community.as_bytes().to_vec(),
            options,
            request_ids: AtomicI32::new(random::<i32>() & 0x3fff_ffff),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Retrieves every binding under `root`, in agent order.
    ///
    /// v2c sessions page through the subtree with GET-BULK, v1 sessions with
    /// GET-NEXT. The walk stops at endOfMibView, at the first OID outside the
    /// subtree, or when the agent stops making progress. On failure the rows
    /// already received are handed back in the [`WalkError`].
    pub async fn walk(&self, root: &Oid) -> Result<Vec<VarBind>, WalkError> {
        let mut rows = Vec::new();
        let mut cursor = root.clone();

        loop {
            let request_id = self.next_request_id();
            let request = match self.version {
                SnmpVersion::V1 => Pdu::get_next(request_id, std::slice::from_ref(&cursor)),
                SnmpVersion::V2c => Pdu::get_bulk(
                    request_id,
                    0,
                    self.options.max_repetitions,
                    std::slice::from_ref(&cursor),
                ),
            };
            let response = match self.request(request).await {
                Ok(response) => response,
                Err(source) => return Err(WalkError { rows, source }),
            };

            if response.error_status != 0 {
                if self.version == SnmpVersion::V1 && response.error_status == NO_SUCH_NAME {
                    break;
                }
                let source = SnmpError::Agent {
                    status: response.error_status,
                    index: response.error_index,
                };
                return Err(WalkError { rows, source });
            }
            if response.varbinds.is_empty() {
                break;
            }

            for varbind in response.varbinds {
                let finished = varbind.value.is_exception()
                    || !varbind.oid.starts_with(root)
                    || varbind.oid <= cursor;
                if finished {
                    trace!(root = %root, rows = rows.len(), "Walk reached end of subtree.");
                    return Ok(rows);
                }
                cursor = varbind.oid.clone();
                rows.push(varbind);
            }
        }

        Ok(rows)
    }

    fn next_request_id(&self) -> i32 {
        self.request_ids.fetch_add(1, Ordering::Relaxed) & 0x7fff_ffff
    }

    async fn request(&self, pdu: Pdu) -> Result<Pdu, SnmpError> {
        let request_id = pdu.request_id;
        let payload = Message {
            version: self.version,
            community: self.community.clone(),
            pdu,
        }
        .encode();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let attempts = self.options.retries + 1;

        for attempt in 1..=attempts {
            self.socket.send(&payload).await?;
            let deadline = Instant::now() + self.options.timeout;

            while let Ok(received) = timeout_at(deadline, self.socket.recv(&mut buf)).await {
                let len = received?;
                let message = match Message::decode(&buf[..len]) {
                    Ok(message) => message,
                    Err(e) => {
                        debug!(
                            target_addr = %self.target,
                            error = %e,
                            "Discarding malformed SNMP datagram."
                        );
                        continue;
                    }
                };
                if message.pdu.kind == PduKind::Response && message.pdu.request_id == request_id {
                    return Ok(message.pdu);
                }
                debug!(
                    target_addr = %self.target,
                    expected = request_id,
                    received = message.pdu.request_id,
                    "Discarding unexpected SNMP response."
                );
            }

            if attempt < attempts {
                debug!(target_addr = %self.target, attempt, "SNMP request timed out, retrying.");
            }
        }

        Err(SnmpError::Timeout {
            attempts,
            timeout: self.options.timeout,
        })
    }
}
