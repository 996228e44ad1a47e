//! Client side of the sync protocol.

use crate::PeerId;
use futures::future::BoxFuture;
use istria_chain::SyncStatus;
use istria_messages::{
    GetCurrentRequest, GetHeadersRequest, GetObjectsRequest, ObjectKind, ObjectsResponse,
    SyncRequest, SyncResponse,
};
use istria_types::{Body, Hash, Header};
use thiserror::Error;

/// Errors on the request path.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport failed to deliver the request or response.
    #[error("transport: {0}")]
    Transport(String),

    /// The peer answered with the wrong response variant.
    #[error("unexpected response variant")]
    UnexpectedResponse,

    /// The peer rejected the request.
    #[error("peer error: {0}")]
    Remote(String),

    /// The response length does not match the request.
    #[error("not correct size")]
    NotCorrectSize,

    /// A payload failed to decode.
    #[error("undecodable payload: {0}")]
    Decode(String),

    /// A status hash failed to parse.
    #[error("bad status hash: {0}")]
    BadStatus(String),
}

/// Outbound request path to one peer.
///
/// The production node routes this over libp2p request-response; tests
/// short-circuit it to a local [`crate::SyncService`].
pub trait SyncClient: Send + Sync {
    /// Send one request and await the peer's response.
    fn request<'a>(
        &'a self,
        peer: &'a PeerId,
        req: SyncRequest,
    ) -> BoxFuture<'a, Result<SyncResponse, ClientError>>;
}

/// Fetch a peer's advertised status.
pub async fn get_status(client: &dyn SyncClient, peer: &PeerId) -> Result<SyncStatus, ClientError> {
    let resp = client
        .request(peer, SyncRequest::GetCurrent(GetCurrentRequest))
        .await?;
    let status = match resp {
        SyncResponse::Status(status) => status,
        SyncResponse::Error(e) => return Err(ClientError::Remote(e)),
        _ => return Err(ClientError::UnexpectedResponse),
    };
    let hash = Hash::from_hex(&status.hash).map_err(|e| ClientError::BadStatus(e.to_string()))?;
    Ok(SyncStatus {
        hash,
        number: status.number,
        difficulty: status.total_difficulty(),
    })
}

/// Fetch up to `amount` headers ascending from `origin`.
pub async fn get_headers(
    client: &dyn SyncClient,
    peer: &PeerId,
    origin: u64,
    amount: i64,
) -> Result<Vec<Header>, ClientError> {
    let resp = client
        .request(
            peer,
            SyncRequest::GetHeaders(GetHeadersRequest::by_number(origin, amount, 0)),
        )
        .await?;
    let objects = into_objects(resp)?;

    let mut headers = Vec::with_capacity(objects.objects.len());
    for obj in &objects.objects {
        if obj.is_missing() {
            return Err(ClientError::Decode("empty header slot".into()));
        }
        let header: Header =
            sbor::basic_decode(&obj.value).map_err(|e| ClientError::Decode(format!("{e:?}")))?;
        headers.push(header);
    }
    Ok(headers)
}

/// Fetch bodies for `hashes`; `None` marks a body the peer no longer has.
///
/// The response must carry exactly one slot per requested hash, in order;
/// anything else is "not correct size" and condemns the batch.
pub async fn get_bodies(
    client: &dyn SyncClient,
    peer: &PeerId,
    hashes: &[Hash],
) -> Result<Vec<Option<Body>>, ClientError> {
    let resp = client
        .request(
            peer,
            SyncRequest::GetObjects(GetObjectsRequest::new(
                hashes.iter().copied(),
                ObjectKind::Bodies,
            )),
        )
        .await?;
    let objects = into_objects(resp)?;

    if objects.objects.len() != hashes.len() {
        return Err(ClientError::NotCorrectSize);
    }

    let mut bodies = Vec::with_capacity(hashes.len());
    for obj in &objects.objects {
        if obj.is_missing() {
            bodies.push(None);
            continue;
        }
        let body: Body =
            sbor::basic_decode(&obj.value).map_err(|e| ClientError::Decode(format!("{e:?}")))?;
        bodies.push(Some(body));
    }
    Ok(bodies)
}

fn into_objects(resp: SyncResponse) -> Result<ObjectsResponse, ClientError> {
    match resp {
        SyncResponse::Objects(objects) => Ok(objects),
        SyncResponse::Error(e) => Err(ClientError::Remote(e)),
        _ => Err(ClientError::UnexpectedResponse),
    }
}
