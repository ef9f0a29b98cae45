//! In-process SNMP agent answering from a fixed MIB table, for tests.
use super::ber::{Message, ObjectValue, Oid, Pdu, PduKind, SnmpVersion, VarBind};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

pub(crate) struct FakeAgent {
    port: u16,
    requests: Arc<AtomicUsize>,
    drops: Arc<AtomicUsize>,
    answers_left: Arc<AtomicUsize>,
    noise: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl FakeAgent {
    pub(crate) async fn start(community: &str, table: Vec<(Oid, ObjectValue)>) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let table: BTreeMap<Oid, ObjectValue> = table.into_iter().collect();
        let community = community.as_bytes().to_vec();
        let requests = Arc::new(AtomicUsize::new(0));
        let drops = Arc::new(AtomicUsize::new(0));
        let answers_left = Arc::new(AtomicUsize::new(usize::MAX));
        let noise = Arc::new(AtomicUsize::new(0));

        let handle = tokio::spawn({
            let requests = requests.clone();
            let drops = drops.clone();
            let answers_left = answers_left.clone();
            let noise = noise.clone();
            async move {
                let mut buf = vec![0u8; 65_535];
                loop {
                    let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                        break;
                    };
                    let Ok(request) = Message::decode(&buf[..len]) else {
                        continue;
                    };
                    requests.fetch_add(1, Ordering::SeqCst);
                    if request.community != community {
                        continue;
                    }
                    if drops.load(Ordering::SeqCst) > 0 {
                        drops.fetch_sub(1, Ordering::SeqCst);
                        continue;
                    }
                    if answers_left.load(Ordering::SeqCst) == 0 {
                        continue;
                    }
                    answers_left.fetch_sub(1, Ordering::SeqCst);
                    if noise.load(Ordering::SeqCst) > 0 {
                        noise.fetch_sub(1, Ordering::SeqCst);
                        let _ = socket.send_to(&[0x30, 0x03, 0xff, 0xff], peer).await;
                    }
                    let response = answer(&table, &request);
                    let _ = socket.send_to(&response.encode(), peer).await;
                }
            }
        });

        Self {
            port,
            requests,
            drops,
            answers_left,
            noise,
            handle,
        }
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Silently drops the next `count` requests that carry the right community.
    pub(crate) fn drop_next(&self, count: usize) {
        self.drops.store(count, Ordering::SeqCst);
    }

    /// Answers `count` more requests, then stays silent.
    pub(crate) fn go_silent_after(&self, count: usize) {
        self.answers_left.store(count, Ordering::SeqCst);
    }

    /// Precedes the next `count` answers with an undecodable datagram.
    pub(crate) fn garble_next(&self, count: usize) {
        self.noise.store(count, Ordering::SeqCst);
    }
}

impl Drop for FakeAgent {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn answer(table: &BTreeMap<Oid, ObjectValue>, request: &Message) -> Message {
    let mut varbinds = Vec::new();
    let mut error_status = 0;

    if let Some(start) = request.pdu.varbinds.first().map(|vb| vb.oid.clone()) {
        let mut following = table.range((Bound::Excluded(start.clone()), Bound::Unbounded));
        match request.pdu.kind {
            PduKind::GetBulkRequest => {
                let repetitions = request.pdu.error_index.max(1) as usize;
                for _ in 0..repetitions {
                    match following.next() {
                        Some((oid, value)) => {
                            varbinds.push(VarBind::new(oid.clone(), value.clone()))
                        }
                        None => {
                            varbinds.push(VarBind::new(start.clone(), ObjectValue::EndOfMibView));
                            break;
                        }
                    }
                }
            }
            PduKind::GetNextRequest => match following.next() {
                Some((oid, value)) => varbinds.push(VarBind::new(oid.clone(), value.clone())),
                None if request.version == SnmpVersion::V1 => {
                    error_status = 2;
                    varbinds.push(VarBind::new(start, ObjectValue::Null));
                }
                None => varbinds.push(VarBind::new(start, ObjectValue::EndOfMibView)),
            },
            PduKind::GetRequest => {
                let value = table.get(&start).cloned().unwrap_or(ObjectValue::NoSuchInstance);
                varbinds.push(VarBind::new(start, value));
            }
            PduKind::Response => {}
        }
    }

    Message {
        version: request.version,
        community: request.community.clone(),
        pdu: Pdu {
            kind: PduKind::Response,
            request_id: request.pdu.request_id,
            error_status,
            error_index: i64::from(error_status != 0),
            varbinds,
        },
    }
}
