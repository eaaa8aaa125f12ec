use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use storefront_api::services::payment_gateway::{
    GatewayError, IntentStatus, PaymentGateway, StripeGateway,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

fn secret() -> SecretString {
    SecretString::from("sk_test_123".to_string())
}

async fn gateway(server: &MockServer, timeout: Duration) -> StripeGateway {
    StripeGateway::new(format!("{}/", server.uri()), timeout).unwrap()
}

#[tokio::test]
async fn retrieves_intent_with_merchant_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_123"))
        .and(header("authorization", "Basic c2tfdGVzdF8xMjM6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_123",
            "object": "payment_intent",
            "status": "succeeded",
            "amount": 2000,
            "amount_received": 2000,
            "currency": "usd",
            "metadata": {"user_id": "9f1c"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let intent = gateway(&server, Duration::from_secs(2))
        .await
        .retrieve_payment_intent(&secret(), "pi_123")
        .await
        .unwrap();

    assert_eq!(intent.id, "pi_123");
    assert_eq!(intent.status, IntentStatus::Succeeded);
    assert_eq!(intent.amount_received, Some(2000));
    assert_eq!(intent.currency.as_deref(), Some("usd"));
}

#[tokio::test]
async fn unknown_intent_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": "resource_missing", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let err = gateway(&server, Duration::from_secs(2))
        .await
        .retrieve_payment_intent(&secret(), "pi_missing")
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::NotFound));
}

#[tokio::test]
async fn server_error_maps_to_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = gateway(&server, Duration::from_secs(2))
        .await
        .retrieve_payment_intent(&secret(), "pi_500")
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Unavailable(_)));
    assert!(!err.to_string().contains("sk_test_123"));
}

#[tokio::test]
async fn slow_gateway_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "pi_slow", "status": "succeeded"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = gateway(&server, Duration::from_millis(100))
        .await
        .retrieve_payment_intent(&secret(), "pi_slow")
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Timeout));
}

#[tokio::test]
async fn malformed_body_is_not_trusted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"id\": "))
        .mount(&server)
        .await;

    let err = gateway(&server, Duration::from_secs(2))
        .await
        .retrieve_payment_intent(&secret(), "pi_bad")
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Malformed(_)));
}
