use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{GraphQlRequest, GraphQlResponse};

/// Subprotocol negotiated on the subscription socket.
pub const SUBPROTOCOL: &str = "graphql-ws";

/// Handshake payload. The token is captured once, when the socket is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    #[serde(rename = "authToken")]
    pub auth_token: Option<String>,
}

/// Frames sent FROM client TO server over the subscription socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Authenticate the socket
    ConnectionInit { payload: ConnectionParams },

    /// Start a subscription operation under `id`
    Start { id: String, payload: GraphQlRequest },

    /// Stop the operation started under `id`
    Stop { id: String },

    /// Close the whole connection
    ConnectionTerminate,
}

/// Frames sent FROM server TO client over the subscription socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake accepted
    ConnectionAck {
        #[serde(default)]
        payload: Value,
    },

    /// Handshake rejected (typically a bad or missing token)
    ConnectionError {
        #[serde(default)]
        payload: Value,
    },

    /// Keep-alive
    #[serde(rename = "ka")]
    KeepAlive {},

    /// One result for a running operation
    Data { id: String, payload: GraphQlResponse },

    /// Operation failed before producing results
    Error {
        id: String,
        #[serde(default)]
        payload: Value,
    },

    /// Server finished the operation
    Complete { id: String },
}

impl ServerFrame {
    /// Returns the operation id if this frame is scoped to one operation.
    /// Frames that return `None` concern the whole connection.
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            Self::Data { id, .. } | Self::Error { id, .. } | Self::Complete { id } => Some(id),
            _ => None,
        }
    }
}
