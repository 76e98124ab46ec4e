//! Celery message protocol (v1 envelope, JSON body).
//!
//! Workers consuming the queue see `task(record_id, url, credential)`.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::{DispatchError, DispatchMessage};

#[derive(Serialize)]
struct TaskBody<'a> {
    id: Uuid,
    task: &'a str,
    args: [&'a str; 3],
    kwargs: Map<String, Value>,
    retries: u32,
    eta: Option<String>,
    expires: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryInfo {
    pub priority: u8,
    pub routing_key: String,
    pub exchange: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CeleryProperties {
    pub body_encoding: String,
    pub correlation_id: Uuid,
    pub reply_to: Uuid,
    pub delivery_info: DeliveryInfo,
    pub delivery_mode: u8,
    pub delivery_tag: Uuid,
}

/// Envelope pushed onto the broker list.
#[derive(Clone, Serialize, Deserialize)]
pub struct CeleryMessage {
    pub body: String,
    pub headers: Map<String, Value>,
    #[serde(rename = "content-type")]
    pub content_type: String,
    pub properties: CeleryProperties,
    #[serde(rename = "content-encoding")]
    pub content_encoding: String,
}

impl CeleryMessage {
    pub fn for_job(
        task_name: &str,
        queue: &str,
        message: &DispatchMessage,
    ) -> Result<Self, DispatchError> {
        let task_id = Uuid::new_v4();
        let body = TaskBody {
            id: task_id,
            task: task_name,
            args: [
                message.record_id.0.as_str(),
                message.url.as_str(),
                message.credential.as_str(),
            ],
            kwargs: Map::new(),
            retries: 0,
            eta: None,
            expires: None,
        };
        let encoded = Zeroizing::new(serde_json::to_vec(&body)?);

        Ok(Self {
            body: STANDARD.encode(encoded.as_slice()),
            headers: Map::new(),
            content_type: "application/json".into(),
            properties: CeleryProperties {
                body_encoding: "base64".into(),
                correlation_id: task_id,
                reply_to: Uuid::new_v4(),
                delivery_info: DeliveryInfo {
                    priority: 0,
                    routing_key: queue.to_string(),
                    exchange: queue.to_string(),
                },
                delivery_mode: 2,
                delivery_tag: Uuid::new_v4(),
            },
            content_encoding: "utf-8".into(),
        })
    }

    pub fn task_id(&self) -> Uuid {
        self.properties.correlation_id
    }

    /// Serialized envelope. Carries the credential, so it is wiped on drop.
    pub fn to_payload(&self) -> Result<Zeroizing<String>, DispatchError> {
        Ok(Zeroizing::new(serde_json::to_string(self)?))
    }
}

impl fmt::Debug for CeleryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CeleryMessage")
            .field("task_id", &self.task_id())
            .field("body", &"<redacted>")
            .field("content_type", &self.content_type)
            .field("properties", &self.properties)
            .finish()
    }
}
