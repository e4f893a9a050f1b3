//! Messaging channels and the booking source against mock APIs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use doorkeep_core::{
    AdminChannel, BookingSource, GuestChannel, GuestWelcome, Language, NotificationDispatcher,
    Notifier, WelcomeCode,
};
use doorkeep_vendors::{
    LodgifyConfig, LodgifySource, TelegramChannel, TelegramConfig, TwilioChannel, TwilioConfig,
};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{
    body_partial_json, body_string_contains, header, header_exists, method, path, query_param,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);
const MESSAGES_PATH: &str = "/2010-04-01/Accounts/AC123/Messages.json";

fn twilio_config(server: &MockServer, from: &str) -> TwilioConfig {
    TwilioConfig {
        account_sid: "AC123".into(),
        auth_token: "auth".into(),
        from: from.into(),
        api_url: server.uri(),
    }
}

fn telegram(server: &MockServer) -> TelegramChannel {
    TelegramChannel::new(
        TelegramConfig {
            bot_token: "bot-token".into(),
            chat_id: "4242".into(),
            api_url: server.uri(),
        },
        TIMEOUT,
    )
}

// ============================================================================
// Guest channels
// ============================================================================

#[tokio::test]
async fn whatsapp_prefixes_both_numbers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MESSAGES_PATH))
        .and(header_exists("authorization"))
        .and(body_string_contains("To=whatsapp%3A%2B393331234567"))
        .and(body_string_contains("From=whatsapp%3A%2B14155238886"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": "SM1"})))
        .expect(1)
        .mount(&server)
        .await;

    let channel = TwilioChannel::whatsapp(twilio_config(&server, "+14155238886"), TIMEOUT);
    assert_eq!(channel.name(), "whatsapp");
    assert!(channel.send("+393331234567", "Benvenuto!").await);
}

#[tokio::test]
async fn sms_failure_is_false() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MESSAGES_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": 21211,
            "message": "Invalid 'To' Phone Number"
        })))
        .mount(&server)
        .await;

    let channel = TwilioChannel::sms(twilio_config(&server, "+15005550006"), TIMEOUT);
    assert!(!channel.send("+393331234567", "Welcome!").await);
}

#[tokio::test]
async fn dispatcher_falls_back_to_sms_when_whatsapp_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MESSAGES_PATH))
        .and(body_string_contains("To=whatsapp"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(MESSAGES_PATH))
        .and(body_string_contains("To=%2B393331234567"))
        .and(body_string_contains("482913"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": "SM2"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/botbot-token/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let dispatcher = NotificationDispatcher::new(
        Arc::new(TwilioChannel::whatsapp(
            twilio_config(&server, "+14155238886"),
            TIMEOUT,
        )),
        Arc::new(telegram(&server)),
    )
    .with_fallback(Arc::new(TwilioChannel::sms(
        twilio_config(&server, "+15005550006"),
        TIMEOUT,
    )));

    let at = |s: &str| DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc);
    let delivered = dispatcher
        .send_guest_welcome(&GuestWelcome {
            booking_id: Uuid::new_v4(),
            guest_first_name: "Mario".into(),
            phone: "+393331234567".into(),
            language: Language::It,
            checkin: at("2025-11-20T15:00:00Z"),
            checkout: at("2025-11-22T11:00:00Z"),
            codes: vec![WelcomeCode {
                display_name: "Portone".into(),
                code: "482913".into(),
            }],
            portal_url: "https://stay.example/g/token".into(),
        })
        .await;

    assert!(delivered);
}

// ============================================================================
// Admin channel
// ============================================================================

#[tokio::test]
async fn telegram_posts_markdown_to_admin_chat() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botbot-token/sendMessage"))
        .and(body_partial_json(json!({
            "chat_id": "4242",
            "text": "*Auto-revoke complete*",
            "parse_mode": "Markdown"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    assert!(telegram(&server).broadcast("*Auto-revoke complete*").await);
}

#[tokio::test]
async fn telegram_ok_false_is_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botbot-token/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": false,
            "description": "Bad Request: chat not found"
        })))
        .mount(&server)
        .await;

    assert!(!telegram(&server).broadcast("hello").await);
}

// ============================================================================
// Booking source
// ============================================================================

fn lodgify(server: &MockServer, api_key: &str) -> LodgifySource {
    LodgifySource::new(LodgifyConfig {
        api_key: api_key.into(),
        property_id: "prop-77".into(),
        api_url: server.uri(),
    })
}

fn dates() -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(2025, 11, 20).unwrap(),
        NaiveDate::from_ymd_opt(2026, 2, 18).unwrap(),
    )
}

#[tokio::test]
async fn lodgify_sends_key_and_range() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/reservations"))
        .and(header("X-ApiKey", "key-1"))
        .and(query_param("property_id", "prop-77"))
        .and(query_param("start", "2025-11-20"))
        .and(query_param("end", "2026-02-18"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "arrival": "2025-12-01", "departure": "2025-12-03"},
            {"id": 2, "arrival": "2025-12-05", "departure": "2025-12-07"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let source = lodgify(&server, "key-1");
    assert!(source.is_configured());
    let (start, end) = dates();
    let records = source.list_reservations(start, end).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["id"], 2);
}

#[tokio::test]
async fn lodgify_accepts_paged_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/reservations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 1,
            "items": [{"id": "A1", "arrival": "2025-12-01", "departure": "2025-12-03"}]
        })))
        .mount(&server)
        .await;

    let (start, end) = dates();
    let records = lodgify(&server, "key-1")
        .list_reservations(start, end)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn lodgify_error_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/reservations"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let (start, end) = dates();
    let err = lodgify(&server, "key-1")
        .list_reservations(start, end)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn lodgify_without_key_is_unconfigured() {
    let server = MockServer::start().await;
    assert!(!lodgify(&server, "").is_configured());
}
