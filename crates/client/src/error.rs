//! Client-side error taxonomy.

use livesync_shared::{ObjectKind, ProtocolError, RpcErrorPayload};

/// Everything a caller of the transport or a manager can see fail.
///
/// Socket drops never surface here directly; they show up as
/// [`ClientError::ConnectionLost`] on the calls that were in flight.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("not connected")]
    NotConnected,
    #[error("connection lost before a response arrived")]
    ConnectionLost,
    #[error("{method} failed: {error}")]
    Rpc {
        method: String,
        error: RpcErrorPayload,
    },
    #[error("loading {kind} failed: {source}")]
    Load {
        kind: ObjectKind,
        #[source]
        source: Box<ClientError>,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    pub(crate) fn load(kind: ObjectKind, source: ClientError) -> Self {
        ClientError::Load {
            kind,
            source: Box::new(source),
        }
    }

    /// The server-supplied payload, when this is an RPC error (possibly
    /// wrapped in a load error).
    pub fn rpc_payload(&self) -> Option<&RpcErrorPayload> {
        match self {
            ClientError::Rpc { error, .. } => Some(error),
            ClientError::Load { source, .. } => source.rpc_payload(),
            _ => None,
        }
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
