//! Raft network layer over HTTP/JSON.
//!
//! Implements `RaftNetworkFactory` and `RaftNetwork` so openraft can reach
//! peers. Every RPC is a `POST` of the JSON-encoded openraft request to the
//! peer's raft router (see [`crate::server`]); the reply body is the
//! JSON-encoded `Result` the peer's raft returned.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use openraft::error::{InstallSnapshotError, RPCError, RaftError, RemoteError, Unreachable};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest,
    InstallSnapshotResponse, VoteRequest, VoteResponse,
};
use openraft::BasicNode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::typ::TypeConfig;

pub const APPEND_PATH: &str = "/raft/append";
pub const VOTE_PATH: &str = "/raft/vote";
pub const SNAPSHOT_PATH: &str = "/raft/snapshot";
pub const WRITE_PATH: &str = "/raft/write";

/// Per-RPC deadline, connect included.
const RPC_TIMEOUT: Duration = Duration::from_secs(2);

/// `POST` a JSON body to `http://{addr}{path}` and decode the JSON reply.
///
/// One connection per call. Transport, HTTP status, and decode failures
/// all surface as `io::Error`.
pub(crate) async fn post_json<Req, Resp>(addr: &str, path: &str, body: &Req) -> io::Result<Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let payload = serde_json::to_vec(body).map_err(io::Error::other)?;
    let uri = format!("http://{addr}{path}");

    match tokio::time::timeout(RPC_TIMEOUT, exchange(addr, &uri, payload)).await {
        Ok(reply) => {
            let bytes = reply?;
            serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::other(format!("{uri}: decode reply: {e}")))
        }
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{uri}: no reply within {RPC_TIMEOUT:?}"),
        )),
    }
}

async fn exchange(addr: &str, uri: &str, payload: Vec<u8>) -> io::Result<Bytes> {
    let stream = tokio::net::TcpStream::connect(addr).await?;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(io::Error::other)?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "raft peer connection closed");
        }
    });

    let req = http::Request::builder()
        .method(http::Method::POST)
        .uri(uri)
        .header(http::header::HOST, addr)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(payload)))
        .map_err(io::Error::other)?;

    let resp = sender.send_request(req).await.map_err(io::Error::other)?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(io::Error::other)?
        .to_bytes();

    if !status.is_success() {
        return Err(io::Error::other(format!(
            "{uri}: HTTP {status}: {}",
            String::from_utf8_lossy(&body)
        )));
    }
    Ok(body)
}

/// Factory that creates per-peer HTTP connections.
pub struct NetworkFactory;

/// A peer reached by address. Connections are opened per RPC.
pub struct NetworkConnection {
    target: u64,
    addr: String,
}

impl NetworkConnection {
    async fn call<Req, Resp, E>(
        &self,
        path: &str,
        rpc: &Req,
    ) -> Result<Resp, RPCError<u64, BasicNode, RaftError<u64, E>>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
        E: std::error::Error + DeserializeOwned,
    {
        let reply: Result<Resp, RaftError<u64, E>> = post_json(&self.addr, path, rpc)
            .await
            .map_err(|e| {
                debug!(target_node = self.target, addr = %self.addr, path, error = %e, "raft RPC failed");
                RPCError::Unreachable(Unreachable::new(&e))
            })?;

        reply.map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))
    }
}

impl RaftNetworkFactory<TypeConfig> for NetworkFactory {
    type Network = NetworkConnection;

    async fn new_client(&mut self, target: u64, node: &BasicNode) -> Self::Network {
        debug!(target, addr = %node.addr, "creating raft network connection");
        NetworkConnection {
            target,
            addr: node.addr.clone(),
        }
    }
}

impl RaftNetwork<TypeConfig> for NetworkConnection {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<u64>, RPCError<u64, BasicNode, RaftError<u64>>> {
        self.call(APPEND_PATH, &rpc).await
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<u64>,
        RPCError<u64, BasicNode, RaftError<u64, InstallSnapshotError>>,
    > {
        self.call(SNAPSHOT_PATH, &rpc).await
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<u64>,
        _option: RPCOption,
    ) -> Result<VoteResponse<u64>, RPCError<u64, BasicNode, RaftError<u64>>> {
        self.call(VOTE_PATH, &rpc).await
    }
}
