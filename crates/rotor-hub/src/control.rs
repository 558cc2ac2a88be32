use serde::Deserialize;

use rotor_core::ConnectionId;

use crate::hub::BroadcastHub;

/// Inbound control message from a connected client, as delivered by the
/// transport layer: `{"type":"SUBSCRIBE"|"UNSUBSCRIBE","topicKeys":[...]}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "SUBSCRIBE")]
    Subscribe {
        #[serde(rename = "topicKeys")]
        topic_keys: Vec<String>,
    },
    #[serde(rename = "UNSUBSCRIBE")]
    Unsubscribe {
        #[serde(rename = "topicKeys")]
        topic_keys: Vec<String>,
    },
}

impl ControlMessage {
    pub fn parse(raw: &str) -> Result<Self, ControlError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("malformed control message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Parse one raw client message and apply it to the hub. Any inbound message
/// also counts as proof of liveness, well-formed or not.
pub async fn apply_control(
    hub: &BroadcastHub,
    connection_id: &ConnectionId,
    raw: &str,
) -> Result<(), ControlError> {
    hub.touch(connection_id);
    match ControlMessage::parse(raw)? {
        ControlMessage::Subscribe { topic_keys } => {
            hub.subscribe(connection_id, &topic_keys).await;
        }
        ControlMessage::Unsubscribe { topic_keys } => {
            hub.unsubscribe(connection_id, &topic_keys).await;
        }
    }
    Ok(())
}
