use beacon_common::protocol::{Message, MessageType};

use crate::store::RegistryStore;

/// Dispatches one decoded message from a registry session and produces the
/// response to write back.
///
/// Every path answers something; malformed payloads, unknown message types,
/// and handler failures become FAIL responses so the session stays open.
/// `peer` is the observed remote endpoint (`host:port`) and is the heartbeat
/// key for PING messages.
pub async fn handle_message(store: &RegistryStore, peer: &str, msg: Message) -> Message {
    let request_id = msg.request_id;

    match msg.kind() {
        Some(MessageType::HeartbeatRequest) => {
            store.heartbeat(peer).await;
            Message::heartbeat_response(request_id)
        }
        Some(MessageType::RegistryRegister) => match msg.as_service_info() {
            Ok(info) => {
                if info.address.is_empty() {
                    tracing::error!("register rejected: empty address");
                    Message::registry_fail(request_id, "register failed: empty service address")
                } else {
                    tracing::info!(
                        service = %info.service_name,
                        version = %info.version,
                        group = %info.group,
                        address = %info.address,
                        "register request"
                    );
                    store.register(info).await;
                    Message::registry_ok(request_id, "service registered".into())
                }
            }
            Err(e) => {
                tracing::error!("register payload mismatch: {e}");
                Message::registry_fail(request_id, format!("expected ServiceInfo payload: {e}"))
            }
        },
        Some(MessageType::RegistryUnregister) => match msg.as_service_info() {
            Ok(info) => {
                if info.address.is_empty() {
                    tracing::error!("unregister rejected: empty address");
                    Message::registry_fail(request_id, "unregister failed: empty service address")
                } else {
                    tracing::info!(
                        service = %info.service_name,
                        address = %info.address,
                        "unregister request"
                    );
                    store.unregister(&info).await;
                    Message::registry_ok(request_id, "service unregistered".into())
                }
            }
            Err(e) => {
                tracing::error!("unregister payload mismatch: {e}");
                Message::registry_fail(request_id, format!("expected ServiceInfo payload: {e}"))
            }
        },
        Some(MessageType::RegistryLookup) => match msg.as_lookup_request() {
            Ok(req) => {
                let services = store
                    .lookup(&req.service_name, req.version.as_deref(), req.group.as_deref())
                    .await;
                tracing::info!(
                    key = %req.service_key(),
                    found = services.len(),
                    "lookup request"
                );
                let body = beacon_common::protocol::LookupResponse { services };
                match serde_json::to_value(&body) {
                    Ok(value) => Message::registry_ok(request_id, value),
                    Err(e) => Message::registry_fail(request_id, format!("encoding lookup response: {e}")),
                }
            }
            Err(e) => {
                tracing::error!("lookup payload mismatch: {e}");
                Message::registry_fail(
                    request_id,
                    format!("expected RegistryLookupRequest payload: {e}"),
                )
            }
        },
        other => {
            tracing::warn!(message_type = msg.message_type, "unhandled message type");
            Message::registry_fail(
                request_id,
                format!("unknown message type: {}", other.map(|k| k as u8).unwrap_or(msg.message_type)),
            )
        }
    }
}
