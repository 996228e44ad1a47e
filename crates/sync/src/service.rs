//! Server endpoints of the sync protocol.

use crate::{NotifyQueue, PeerId};
use istria_chain::{Blockchain, StatusTracker, StoreError};
use istria_messages::{
    GetHeadersRequest, GetObjectsRequest, NotifyRequest, ObjectKind, ObjectsResponse, RawObject,
    StatusResponse, SyncRequest, SyncResponse, MAX_HEADERS_AMOUNT,
};
use istria_types::{Block, Hash, HexError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Peer-visible protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// GetHeaders carried both a number and a hash origin.
    #[error("cannot have both number and hash origin")]
    BothOrigins,

    /// A negative skip cannot be walked.
    #[error("negative skip")]
    NegativeSkip,

    /// A hash string failed to parse.
    #[error("invalid hash: {0}")]
    BadHash(#[from] HexError),

    /// A pushed payload failed to decode.
    #[error("undecodable payload")]
    BadPayload,

    /// A receipts bulk fetch outgrew the per-call byte cap.
    #[error("response too large")]
    ResponseTooLarge,

    /// A receipts lookup failed; receipts are authoritative storage.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Soft cap on the payload bytes of one bulk-fetch response. Once
/// exceeded, remaining body slots are returned empty (the peer re-requests
/// them); receipts past the cap abort the response.
const MAX_RESPONSE_BYTES: usize = 8 << 20;

/// The server half of the sync protocol.
///
/// Handlers run concurrently per request; they read the blockchain facade
/// (safe for concurrent reads) and never touch consensus state.
pub struct SyncService {
    store: Arc<dyn Blockchain>,
    status: Arc<StatusTracker>,
    queue: Arc<NotifyQueue>,
}

impl SyncService {
    /// Build the service over the store, the status tracker and the queue
    /// drained by the syncer.
    pub fn new(
        store: Arc<dyn Blockchain>,
        status: Arc<StatusTracker>,
        queue: Arc<NotifyQueue>,
    ) -> Self {
        Self {
            store,
            status,
            queue,
        }
    }

    /// Dispatch one request from `peer`.
    pub fn handle(&self, peer: &PeerId, req: SyncRequest) -> Result<SyncResponse, ProtocolError> {
        trace!(peer = %peer, kind = req.kind_name(), "Sync request");
        match req {
            SyncRequest::GetCurrent(_) => Ok(SyncResponse::Status(self.get_current())),
            SyncRequest::GetHeaders(req) => Ok(SyncResponse::Objects(self.get_headers(req)?)),
            SyncRequest::GetObjects(req) => {
                Ok(SyncResponse::Objects(self.get_objects_by_hash(req)?))
            }
            SyncRequest::Notify(req) => {
                self.notify(peer.clone(), req)?;
                Ok(SyncResponse::Ack)
            }
        }
    }

    /// `Notify`: enqueue a pushed block for asynchronous processing.
    ///
    /// Only the acknowledgement is synchronous; validation and application
    /// happen in the syncer task.
    pub fn notify(&self, peer: PeerId, req: NotifyRequest) -> Result<(), ProtocolError> {
        let block = Block::decode(&req.raw).map_err(|e| {
            warn!(peer = %peer, error = ?e, "Undecodable notify payload");
            ProtocolError::BadPayload
        })?;
        debug!(peer = %peer, number = block.number(), "Block pushed");
        self.queue.push(peer, block);
        Ok(())
    }

    /// `GetCurrent`: snapshot of the local status.
    pub fn get_current(&self) -> StatusResponse {
        let status = self.status.get();
        StatusResponse {
            hash: status.hash.to_hex(),
            number: status.number,
            difficulty: StatusResponse::difficulty_bytes(status.difficulty),
        }
    }

    /// `GetObjectsByHash`: bodies or receipts, one slot per requested hash,
    /// order preserved.
    ///
    /// Body misses yield an empty slot (bodies may be pruned); a receipts
    /// miss aborts the whole response, since receipts are authoritative.
    pub fn get_objects_by_hash(
        &self,
        req: GetObjectsRequest,
    ) -> Result<ObjectsResponse, ProtocolError> {
        let mut objects = Vec::with_capacity(req.hashes.len());
        let mut total_bytes = 0usize;
        for raw_hash in &req.hashes {
            let hash = Hash::from_hex(raw_hash)?;
            if total_bytes > MAX_RESPONSE_BYTES {
                match req.kind {
                    // The length law still holds: the slot is a miss.
                    ObjectKind::Bodies => {
                        objects.push(RawObject::missing());
                        continue;
                    }
                    ObjectKind::Receipts => return Err(ProtocolError::ResponseTooLarge),
                }
            }
            let slot = match req.kind {
                ObjectKind::Bodies => match self.store.body_by_hash(&hash) {
                    Some(body) => RawObject::filled(
                        sbor::basic_encode(&body).expect("body encoding is infallible"),
                    ),
                    None => RawObject::missing(),
                },
                ObjectKind::Receipts => {
                    let receipts = self.store.receipts_by_hash(&hash)?;
                    RawObject::filled(receipts.encode())
                }
            };
            total_bytes += slot.value.len();
            objects.push(slot);
        }
        Ok(ObjectsResponse { objects })
    }

    /// `GetHeaders`: up to `amount` headers from the origin, striding by
    /// `skip + 1`. A missing origin yields an empty response, not an error.
    pub fn get_headers(&self, req: GetHeadersRequest) -> Result<ObjectsResponse, ProtocolError> {
        if req.number != 0 && !req.hash.is_empty() {
            return Err(ProtocolError::BothOrigins);
        }
        if req.skip < 0 {
            return Err(ProtocolError::NegativeSkip);
        }
        let amount = req.amount.min(MAX_HEADERS_AMOUNT);

        let origin = if req.number != 0 {
            self.store.header_by_number(req.number as u64)
        } else {
            let hash = Hash::from_hex(&req.hash)?;
            self.store.header_by_hash(&hash)
        };
        let Some(mut origin) = origin else {
            return Ok(ObjectsResponse::default());
        };

        let stride = req.skip + 1;
        let mut objects = vec![RawObject::filled(
            sbor::basic_encode(&origin).expect("header encoding is infallible"),
        )];

        let mut count: i64 = 1;
        while count < amount {
            let next = origin.number as i64 + stride;
            if next < 0 {
                break;
            }
            match self.store.header_by_number(next as u64) {
                Some(header) => {
                    objects.push(RawObject::filled(
                        sbor::basic_encode(&header).expect("header encoding is infallible"),
                    ));
                    origin = header;
                    count += 1;
                }
                None => break,
            }
        }

        Ok(ObjectsResponse { objects })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use istria_chain::InMemoryChain;
    use istria_types::{Body, Header, Receipts};

    fn chain_to(height: u64) -> Arc<InMemoryChain> {
        let chain = Arc::new(InMemoryChain::with_genesis(Header {
            gas_limit: 8_000_000,
            ..Default::default()
        }));
        for _ in 0..height {
            let parent = chain.header();
            chain
                .write_blocks(vec![Block::new(
                    Header {
                        parent_hash: parent.hash(),
                        number: parent.number + 1,
                        timestamp: parent.timestamp + 1,
                        gas_limit: parent.gas_limit,
                        difficulty: 1,
                        ..Default::default()
                    },
                    Body::default(),
                )])
                .unwrap();
        }
        chain
    }

    fn service_over(chain: Arc<InMemoryChain>) -> SyncService {
        let status = chain.status();
        SyncService::new(chain, status, Arc::new(NotifyQueue::new(8)))
    }

    fn decode_headers(resp: &ObjectsResponse) -> Vec<Header> {
        resp.objects
            .iter()
            .map(|o| sbor::basic_decode(&o.value).unwrap())
            .collect()
    }

    #[test]
    fn get_current_reflects_head() {
        let chain = chain_to(3);
        let service = service_over(chain.clone());

        let status = service.get_current();
        assert_eq!(status.number, 3);
        assert_eq!(status.hash, chain.header().hash().to_hex());
    }

    #[test]
    fn get_headers_clamps_amount() {
        // Chain 0..=20; origin 10, amount 500 → 11 headers (10..=20).
        let service = service_over(chain_to(20));
        let resp = service
            .get_headers(GetHeadersRequest::by_number(10, 500, 0))
            .unwrap();
        let headers = decode_headers(&resp);
        assert_eq!(headers.len(), 11);
        assert_eq!(headers[0].number, 10);
        assert_eq!(headers[10].number, 20);
    }

    #[test]
    fn get_headers_skip_law() {
        // i-th header number = origin + i * (skip + 1).
        let service = service_over(chain_to(20));
        let resp = service
            .get_headers(GetHeadersRequest::by_number(2, 5, 2))
            .unwrap();
        let numbers: Vec<u64> = decode_headers(&resp).iter().map(|h| h.number).collect();
        assert_eq!(numbers, vec![2, 5, 8, 11, 14]);
    }

    #[test]
    fn get_headers_stops_at_missing_height() {
        let service = service_over(chain_to(5));
        let resp = service
            .get_headers(GetHeadersRequest::by_number(3, 100, 0))
            .unwrap();
        let numbers: Vec<u64> = decode_headers(&resp).iter().map(|h| h.number).collect();
        assert_eq!(numbers, vec![3, 4, 5]);
    }

    #[test]
    fn get_headers_by_hash_origin() {
        let chain = chain_to(5);
        let service = service_over(chain.clone());
        let origin_hash = chain.header_by_number(2).unwrap().hash();

        let resp = service
            .get_headers(GetHeadersRequest::by_hash(origin_hash.to_hex(), 2, 0))
            .unwrap();
        let numbers: Vec<u64> = decode_headers(&resp).iter().map(|h| h.number).collect();
        assert_eq!(numbers, vec![2, 3]);
    }

    #[test]
    fn get_headers_rejects_both_origins() {
        let service = service_over(chain_to(5));
        let mut req = GetHeadersRequest::by_number(5, 10, 0);
        req.hash = "0xabcd".into();
        assert!(matches!(
            service.get_headers(req),
            Err(ProtocolError::BothOrigins)
        ));
    }

    #[test]
    fn get_headers_rejects_negative_skip() {
        let service = service_over(chain_to(5));
        assert!(matches!(
            service.get_headers(GetHeadersRequest::by_number(1, 10, -2)),
            Err(ProtocolError::NegativeSkip)
        ));
    }

    #[test]
    fn get_headers_missing_origin_is_empty() {
        let service = service_over(chain_to(5));
        let resp = service
            .get_headers(GetHeadersRequest::by_number(99, 10, 0))
            .unwrap();
        assert!(resp.objects.is_empty());
    }

    #[test]
    fn get_objects_preserves_length_and_order() {
        let chain = chain_to(3);
        let service = service_over(chain.clone());

        let known = chain.header_by_number(1).unwrap().hash();
        let unknown = Hash::from_bytes([0xaa; 32]);
        let resp = service
            .get_objects_by_hash(GetObjectsRequest::new([known, unknown], ObjectKind::Bodies))
            .unwrap();

        assert_eq!(resp.objects.len(), 2);
        assert!(!resp.objects[0].is_missing());
        assert!(resp.objects[1].is_missing());
    }

    #[test]
    fn receipts_miss_aborts_response() {
        let chain = chain_to(2);
        let service = service_over(chain.clone());
        let known = chain.header_by_number(1).unwrap().hash();
        let unknown = Hash::from_bytes([0xaa; 32]);

        let result = service
            .get_objects_by_hash(GetObjectsRequest::new([known, unknown], ObjectKind::Receipts));
        assert!(matches!(result, Err(ProtocolError::Store(_))));
    }

    #[test]
    fn receipts_fetch_decodes() {
        let chain = chain_to(2);
        let service = service_over(chain.clone());
        let known = chain.header_by_number(1).unwrap().hash();

        let resp = service
            .get_objects_by_hash(GetObjectsRequest::new([known], ObjectKind::Receipts))
            .unwrap();
        assert_eq!(resp.objects.len(), 1);
        Receipts::decode(&resp.objects[0].value).unwrap();
    }

    #[test]
    fn notify_enqueues_for_the_syncer() {
        let chain = chain_to(0);
        let status = chain.status();
        let queue = Arc::new(NotifyQueue::new(8));
        let service = SyncService::new(chain, status, queue.clone());

        let block = Block::default();
        service
            .notify(PeerId::new("p1"), NotifyRequest::new(block.encode()))
            .unwrap();

        let (peer, queued) = queue.pop().unwrap();
        assert_eq!(peer, PeerId::new("p1"));
        assert_eq!(queued, block);
    }

    #[test]
    fn notify_rejects_garbage() {
        let service = service_over(chain_to(0));
        let result = service.notify(PeerId::new("p1"), NotifyRequest::new(vec![0xff, 0x01]));
        assert!(matches!(result, Err(ProtocolError::BadPayload)));
    }

    #[test]
    fn handle_dispatches() {
        let service = service_over(chain_to(2));
        let peer = PeerId::new("p");

        let resp = service
            .handle(&peer, SyncRequest::GetCurrent(Default::default()))
            .unwrap();
        assert!(matches!(resp, SyncResponse::Status(s) if s.number == 2));

        let resp = service
            .handle(
                &peer,
                SyncRequest::GetHeaders(GetHeadersRequest::by_number(1, 10, 0)),
            )
            .unwrap();
        assert!(matches!(resp, SyncResponse::Objects(o) if o.objects.len() == 2));
    }
}
