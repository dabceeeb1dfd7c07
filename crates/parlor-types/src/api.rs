use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::models::{Continuation, Cursor, Message, Page, PageEntry, RoomId, User, UserId};

// -- Token claims --

/// Claims carried by the access token. Only read client-side, never verified
/// here; the server remains the authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub exp: Option<u64>,
}

// -- Operation documents --

pub const FETCH_MESSAGES: &str = r#"query FetchMessages($roomId: Int!, $last: Int!, $before: String) {
  messagesByRoom(roomId: $roomId, last: $last, before: $before) {
    edges {
      cursor
      node {
        id
        content
        timestamp
        sender { id name }
      }
    }
    pageInfo { hasPreviousPage startCursor }
  }
}"#;

pub const CREATE_MESSAGE: &str = r#"mutation CreateMessage($content: String!, $userId: Int!, $roomId: Int!) {
  createMessage(content: $content, userId: $userId, roomId: $roomId) {
    message {
      id
      content
      timestamp
      sender { id name }
    }
  }
}"#;

pub const LOGIN: &str = r#"mutation Login($email: String!, $password: String!) {
  authLogin(email: $email, password: $password) {
    accessToken
    user { id name }
  }
}"#;

pub const MESSAGE_CREATED: &str = r#"subscription OnMessageCreated($roomId: Int!) {
  messageCreated(roomId: $roomId) {
    id
    content
    timestamp
    sender { id name }
  }
}"#;

// -- Envelopes --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub variables: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

impl GraphQlRequest {
    pub fn new(query: &str, operation_name: &str, variables: Value) -> Self {
        Self {
            query: query.to_string(),
            variables,
            operation_name: Some(operation_name.to_string()),
        }
    }

    pub fn fetch_messages(room_id: RoomId, last: u32, before: Option<&Cursor>) -> Self {
        Self::new(
            FETCH_MESSAGES,
            "FetchMessages",
            json!({ "roomId": room_id, "last": last, "before": before }),
        )
    }

    pub fn create_message(content: &str, user_id: UserId, room_id: RoomId) -> Self {
        Self::new(
            CREATE_MESSAGE,
            "CreateMessage",
            json!({ "content": content, "userId": user_id, "roomId": room_id }),
        )
    }

    pub fn login(email: &str, password: &str) -> Self {
        Self::new(LOGIN, "Login", json!({ "email": email, "password": password }))
    }

    pub fn message_created(room_id: RoomId) -> Self {
        Self::new(MESSAGE_CREATED, "OnMessageCreated", json!({ "roomId": room_id }))
    }

    pub fn operation_name(&self) -> Option<&str> {
        self.operation_name.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQlError {
    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref()?.get("code")?.as_str()
    }

    pub fn is_unauthenticated(&self) -> bool {
        self.code() == Some("UNAUTHENTICATED")
    }
}

// -- Response payloads --

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchMessagesData {
    pub messages_by_room: MessageConnection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageConnection {
    #[serde(default)]
    pub edges: Vec<MessageEdge>,
    pub page_info: PageInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEdge {
    pub cursor: Cursor,
    pub node: Message,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub has_previous_page: bool,
    #[serde(default)]
    pub start_cursor: Option<Cursor>,
}

impl From<MessageConnection> for Page {
    fn from(conn: MessageConnection) -> Self {
        let entries = conn
            .edges
            .into_iter()
            .map(|edge| PageEntry {
                cursor: edge.cursor,
                message: edge.node,
            })
            .collect();
        Page::new(
            entries,
            Continuation {
                has_more: conn.page_info.has_previous_page,
                next_cursor: conn.page_info.start_cursor,
            },
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageData {
    pub create_message: CreateMessagePayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMessagePayload {
    pub message: Message,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub auth_login: LoginPayload,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCreatedData {
    pub message_created: Message,
}
