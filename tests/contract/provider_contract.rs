//! Contract every provider adapter honours, checked uniformly across
//! SimilarWeb, Instagram, Facebook and NLP.

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;

use brandpulse_gateway::{
    CanonicalRecord, EndpointSpec, Gateway, GatewayError, MemoryAuditSink, ProviderId, RawPayload,
    RecordKind, RequestParams,
};
use serde_json::json;
use support::{gateway, ScriptedHttpClient};

const ALL_KINDS: [RecordKind; 5] = [
    RecordKind::Traffic,
    RecordKind::Seo,
    RecordKind::SocialPost,
    RecordKind::Review,
    RecordKind::Sentiment,
];

fn params_for(endpoint: &EndpointSpec) -> RequestParams {
    endpoint
        .required
        .iter()
        .fold(RequestParams::new(), |params, name| params.with(*name, "sample"))
}

fn contract_gateway(body: &str) -> (Gateway, Arc<ScriptedHttpClient>) {
    let client = Arc::new(ScriptedHttpClient::json(body));
    (gateway(client.clone(), Arc::new(MemoryAuditSink::new())), client)
}

#[tokio::test]
async fn every_endpoint_is_callable_with_its_required_parameters() {
    let (gateway, client) = contract_gateway(r#"{"success":true}"#);
    let mut expected_requests = 0;

    for provider in ProviderId::ALL {
        let adapter = gateway.adapter(provider);
        assert_eq!(adapter.id(), provider);
        assert!(!adapter.endpoints().is_empty(), "{provider} declares no endpoints");

        for endpoint in adapter.endpoints() {
            let raw = adapter
                .fetch_raw(endpoint.name, params_for(endpoint))
                .await
                .unwrap_or_else(|error| panic!("{provider} '{}' failed: {error}", endpoint.name));
            assert!(raw.is_success());
            expected_requests += 1;
        }
    }

    assert_eq!(client.request_count(), expected_requests);
}

#[tokio::test]
async fn every_endpoint_rejects_missing_required_parameters_before_any_request() {
    let (gateway, client) = contract_gateway(r#"{"success":true}"#);

    for provider in ProviderId::ALL {
        let adapter = gateway.adapter(provider);
        for endpoint in adapter.endpoints().iter().filter(|endpoint| !endpoint.required.is_empty()) {
            let error = adapter
                .fetch_raw(endpoint.name, RequestParams::new())
                .await
                .expect_err("missing parameters are rejected");
            assert!(
                matches!(error, GatewayError::InvalidRequest { provider: p, .. } if p == provider),
                "{provider} '{}' returned {error:?}",
                endpoint.name
            );
        }
    }

    assert_eq!(client.request_count(), 0);
}

#[tokio::test]
async fn unknown_endpoints_are_invalid_requests() {
    let (gateway, _client) = contract_gateway("{}");

    for provider in ProviderId::ALL {
        let error = gateway
            .adapter(provider)
            .fetch_raw("does-not-exist", RequestParams::new())
            .await
            .expect_err("unknown endpoint");
        assert_eq!(error.code(), "gateway.invalid_request");
    }
}

#[test]
fn unsuccessful_payloads_normalize_to_nothing_for_every_kind() {
    let (gateway, _client) = contract_gateway("{}");
    let payloads = [
        json!({"success": false, "domain": "a.com", "id": "1", "label": "pos", "data": [{"id": "1"}]}),
        json!({"domain": "a.com", "id": "1", "label": "pos", "data": [{"id": "1"}]}),
        json!({"success": "true", "domain": "a.com", "id": "1", "label": "pos"}),
    ];

    for provider in ProviderId::ALL {
        let adapter = gateway.adapter(provider);
        for payload in &payloads {
            let raw = RawPayload::new(payload.clone());
            for kind in ALL_KINDS {
                assert!(
                    adapter.normalize(kind, &raw).is_empty(),
                    "{provider} produced {kind} from {payload}"
                );
            }
        }
    }
}

#[test]
fn records_carry_the_producing_provider_and_requested_kind() {
    let (gateway, _client) = contract_gateway("{}");
    let cases = [
        (ProviderId::SimilarWeb, RecordKind::Traffic, json!({"success": true, "domain": "a.com"})),
        (ProviderId::SimilarWeb, RecordKind::Seo, json!({"success": true, "domain": "a.com"})),
        (ProviderId::Instagram, RecordKind::SocialPost, json!({"success": true, "id": "1", "caption": "hi"})),
        (ProviderId::Instagram, RecordKind::Review, json!({"success": true, "data": [{"id": "c1", "text": "ok"}]})),
        (ProviderId::Facebook, RecordKind::SocialPost, json!({"success": true, "data": [{"id": "1", "message": "hi"}]})),
        (ProviderId::Facebook, RecordKind::Review, json!({"success": true, "id": "r1", "text": "ok", "rating": 4})),
        (ProviderId::Nlp, RecordKind::Sentiment, json!({"success": true, "label": "neg", "probability": {"neg": 0.7}})),
    ];

    for (provider, kind, payload) in cases {
        let records: Vec<CanonicalRecord> = gateway.adapter(provider).normalize(kind, &RawPayload::new(payload));
        assert_eq!(records.len(), 1, "{provider} {kind}");
        assert_eq!(records[0].kind(), kind);
        assert_eq!(records[0].source(), provider);
    }
}
