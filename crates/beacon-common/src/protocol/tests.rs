use serde_json::{json, Value};

use super::*;

#[test]
fn service_key_normalizes_missing_parts() {
    assert_eq!(service_key("svc", None, None), "svc__");
    assert_eq!(service_key("svc", Some(""), Some("")), "svc__");
    assert_eq!(service_key("svc", Some("1.0.0"), Some("g")), "svc_1.0.0_g");
    // The consumer-side request derives the identical key.
    let req = RpcRequest::new("svc", "m", vec![], "1.0.0", "g");
    assert_eq!(req.service_key(), "svc_1.0.0_g");
}

#[test]
fn service_key_empty_name_is_empty() {
    assert_eq!(service_key("", Some("1.0.0"), Some("g")), "");
    let info = ServiceInfo::new("", "1.0.0", "", "10.0.0.1:9000");
    assert_eq!(info.service_key(), "");
}

#[test]
fn request_records_parameter_type_names_in_order() {
    let req = RpcRequest::new(
        "svc",
        "mixed",
        vec![json!("a"), json!(1), json!(true), json!([1]), json!({}), Value::Null],
        "1.0.0",
        "",
    );
    assert_eq!(
        req.parameter_types,
        vec!["string", "number", "boolean", "array", "object", "null"]
    );
}

#[test]
fn response_success_requires_exact_code() {
    assert!(RpcResponse::success(json!(1)).is_success());
    assert!(!RpcResponse::fail("boom").is_success());
    let no_code = RpcResponse {
        code: None,
        message: None,
        data: Value::Null,
    };
    assert!(!no_code.is_success());
}

#[test]
fn message_status_derives_from_response_code() {
    let ok = Message::response(7, &RpcResponse::success(json!("hi"))).unwrap();
    assert!(ok.is_ok());
    assert_eq!(ok.request_id, 7);

    let fail = Message::response(8, &RpcResponse::fail("no such method")).unwrap();
    assert!(!fail.is_ok());
}

#[test]
fn message_typed_accessors_round_trip() {
    let info = ServiceInfo::new("Echo", "1.0.0", "", "10.0.0.1:9000");
    let msg = Message::register(1, &info).unwrap();
    assert_eq!(msg.kind(), Some(MessageType::RegistryRegister));
    assert_eq!(msg.as_service_info().unwrap(), info);

    let lookup = LookupRequest::new("Echo", "1.0.0", "");
    let msg = Message::lookup(2, &lookup).unwrap();
    assert_eq!(msg.as_lookup_request().unwrap(), lookup);

    let resp = Message::registry_ok(
        2,
        serde_json::to_value(LookupResponse {
            services: vec![info.clone()],
        })
        .unwrap(),
    );
    assert_eq!(msg.request_id, resp.request_id);
    assert_eq!(resp.as_lookup_response().unwrap().services, vec![info]);
}

#[test]
fn message_payload_mismatch_is_protocol_error() {
    let msg = Message::heartbeat_request(3);
    let err = msg.as_service_info().unwrap_err();
    assert!(matches!(err, RpcError::Protocol(_)));
}

#[test]
fn heartbeats_carry_ping_pong_tokens() {
    assert_eq!(Message::heartbeat_request(1).data, json!("PING"));
    assert_eq!(Message::heartbeat_response(1).data, json!("PONG"));
    assert_eq!(
        Message::heartbeat_request(1).kind(),
        Some(MessageType::HeartbeatRequest)
    );
}

#[test]
fn unknown_message_type_decodes_without_kind() {
    let raw = json!({
        "messageType": 42,
        "requestId": 5,
    });
    let msg: Message = serde_json::from_value(raw).unwrap();
    assert_eq!(msg.kind(), None);
    assert_eq!(msg.request_id, 5);
    // Omitted fields default to zero/empty.
    assert_eq!(msg.status, 0);
    assert_eq!(msg.data, Value::Null);
}

#[test]
fn envelope_uses_camel_case_wire_names() {
    let msg = Message::registry_fail(9, "bad payload");
    let value = serde_json::to_value(&msg).unwrap();
    let obj = value.as_object().unwrap();
    assert!(obj.contains_key("messageType"));
    assert!(obj.contains_key("serializationType"));
    assert!(obj.contains_key("compressType"));
    assert!(obj.contains_key("requestId"));
    assert_eq!(obj["status"], json!(Status::Fail as u8));
    assert_eq!(obj["serializationType"], json!(SERIALIZATION_JSON));
    assert_eq!(obj["compressType"], json!(COMPRESS_NONE));
}

#[test]
fn registry_fail_preserves_diagnostic_text() {
    let msg = Message::registry_fail(1, "expected ServiceInfo payload");
    assert_eq!(msg.data_as_text(), "expected ServiceInfo payload");
    assert!(!msg.is_ok());
}

#[test]
fn service_info_weight_defaults_to_one() {
    let decoded: ServiceInfo = serde_json::from_value(json!({
        "serviceName": "Echo",
        "version": "1.0.0",
        "group": "",
        "address": "10.0.0.1:9000",
    }))
    .unwrap();
    assert_eq!(decoded.weight, 1);
}
