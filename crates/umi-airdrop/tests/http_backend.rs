use std::io::Read;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use umi_airdrop::backend::http_client::{BackendConfig, HttpClaimBackend};
use umi_airdrop::balance::StaticBalanceReader;
use umi_airdrop::signer::{MockSignerBehavior, MockWalletSigner};
use umi_airdrop::{
    BackendError, BalanceReader, ClaimBackend, ClaimPolicy, ConfirmOutcome,
    VoucherClaimCoordinator,
};

#[derive(Debug, Clone)]
struct Seen {
    method: String,
    url: String,
    authorization: Option<String>,
    body: String,
}

/// Serves `script` responses in order, one per request, then stops.
fn spawn_server(script: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<Seen>>>) {
    use tiny_http::{Header, Response, StatusCode};

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tiny_http::Server::from_listener(listener, None).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_t = Arc::clone(&seen);

    std::thread::spawn(move || {
        for (status, body) in script {
            let mut req = match server.recv_timeout(Duration::from_secs(10)) {
                Ok(Some(r)) => r,
                _ => return,
            };
            let mut req_body = String::new();
            let _ = req.as_reader().read_to_string(&mut req_body);
            let authorization = req
                .headers()
                .iter()
                .find(|h| {
                    h.field
                        .as_str()
                        .to_string()
                        .eq_ignore_ascii_case("authorization")
                })
                .map(|h| h.value.as_str().to_string());
            seen_t.lock().unwrap().push(Seen {
                method: req.method().as_str().to_string(),
                url: req.url().to_string(),
                authorization,
                body: req_body,
            });

            let mut resp = Response::from_string(body).with_status_code(StatusCode(status));
            resp.add_header(
                Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap(),
            );
            let _ = req.respond(resp);
        }
    });

    (format!("http://{addr}"), seen)
}

fn backend(base_url: &str) -> HttpClaimBackend {
    HttpClaimBackend::new(BackendConfig::new(base_url)).unwrap()
}

#[tokio::test]
async fn request_voucher_sends_bearer_token_and_parses_grant() {
    let (url, seen) = spawn_server(vec![(
        200,
        r#"{"voucher":{"to":"0xabc","amount":"500000000000000000","nonce":"7","deadline":"1999999999"},"signature":"0xsig","claimedAmount":"500000000000000000"}"#,
    )]);

    let issued = backend(&url).request_voucher("tok-1").await.unwrap();
    let grant = issued.validate().unwrap();
    assert_eq!(grant.voucher.nonce, "7");
    assert_eq!(grant.signature, "0xsig");

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].url, "/airdrop/request");
    assert_eq!(seen[0].authorization.as_deref(), Some("Bearer tok-1"));
    assert_eq!(seen[0].body, "{}");
}

#[tokio::test]
async fn pending_claim_message_becomes_structured_conflict() {
    let (url, _) = spawn_server(vec![(
        400,
        r#"{"error":"Claim already pending, finish or cancel it first","pending":{"nonce":"41"}}"#,
    )]);

    match backend(&url).request_voucher("tok").await {
        Err(BackendError::PendingClaim(conflict)) => {
            assert_eq!(conflict.nonce.as_deref(), Some("41"));
        }
        other => panic!("expected pending conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn other_request_errors_keep_server_reason() {
    let (url, _) = spawn_server(vec![(403, r#"{"error":"Not eligible for airdrop"}"#)]);

    assert_eq!(
        backend(&url).request_voucher("tok").await.unwrap_err(),
        BackendError::HttpStatus {
            status: 403,
            message: "Not eligible for airdrop".to_string(),
        }
    );
}

#[tokio::test]
async fn non_json_success_body_is_a_decode_error() {
    let (url, _) = spawn_server(vec![(200, "<html>maintenance</html>")]);
    assert!(matches!(
        backend(&url).request_voucher("tok").await,
        Err(BackendError::Decode(_))
    ));
}

#[tokio::test]
async fn cancel_and_confirm_send_expected_bodies() {
    let (url, seen) = spawn_server(vec![
        (200, "{}"),
        (202, r#"{"status":"pending"}"#),
        (200, r#"{"ok":true}"#),
        (409, r#"{"error":"Nonce already used"}"#),
    ]);
    let client = backend(&url);

    client.cancel("tok", "7").await.unwrap();
    assert_eq!(
        client.confirm("tok", "7", "0xtx").await.unwrap(),
        ConfirmOutcome::Pending
    );
    assert_eq!(
        client.confirm("tok", "7", "0xtx").await.unwrap(),
        ConfirmOutcome::Settled
    );
    assert_eq!(
        client.confirm("tok", "7", "0xtx").await.unwrap(),
        ConfirmOutcome::Rejected("Nonce already used".to_string())
    );

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].url, "/airdrop/cancel");
    let cancel: serde_json::Value = serde_json::from_str(&seen[0].body).unwrap();
    assert_eq!(cancel, serde_json::json!({ "nonce": "7" }));
    assert_eq!(seen[1].url, "/airdrop/confirm");
    let confirm: serde_json::Value = serde_json::from_str(&seen[1].body).unwrap();
    assert_eq!(
        confirm,
        serde_json::json!({ "nonce": "7", "transaction_id": "0xtx" })
    );
}

#[tokio::test]
async fn token_balance_reads_mirrored_balance() {
    let (url, seen) = spawn_server(vec![
        (200, r#"{"status":"success","balance":"42.5"}"#),
        (404, r#"{"status":"error","error":"User not found"}"#),
    ]);
    let client = backend(&url);

    assert_eq!(client.read_balance("tok", "0xabc").await.unwrap(), "42.5");
    assert!(client.read_balance("tok", "0xdef").await.is_err());
    assert_eq!(seen.lock().unwrap()[0].url, "/users/token-balance/0xabc");
}

#[tokio::test]
async fn token_balance_does_not_let_address_escape_its_route() {
    let (url, seen) = spawn_server(vec![(200, r#"{"status":"success","balance":"0"}"#)]);

    backend(&url)
        .read_balance("tok", "0xabc/../../airdrop/cancel?nonce=1")
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].method, "GET");
    assert!(seen[0].url.starts_with("/users/token-balance/0xabc%2F"));
    assert!(!seen[0].url.contains('?'));
}

#[tokio::test]
async fn coordinator_over_http_settles_after_two_confirms() {
    let (url, seen) = spawn_server(vec![
        (
            200,
            r#"{"voucher":{"to":"0xabc","amount":"500000000000000000","nonce":"7","deadline":"1999999999"},"signature":"0xsig","claimedAmount":"500000000000000000"}"#,
        ),
        (202, r#"{"status":"pending"}"#),
        (200, r#"{"ok":true}"#),
    ]);
    let signer = Arc::new(MockWalletSigner::new(MockSignerBehavior::ApproveWith(
        "0xtx".to_string(),
    )));
    let coordinator = VoucherClaimCoordinator::new(
        Arc::new(backend(&url)),
        ClaimPolicy {
            confirm_interval_ms: 10,
            ..ClaimPolicy::default()
        },
    )
    .with_signer(signer.clone())
    .with_balance_reader(Arc::new(StaticBalanceReader::new("0.5")));

    let result = coordinator.claim("tok", "0xabc").await.unwrap();

    assert_eq!(result.transaction_id.as_str(), "0xtx");
    assert_eq!(result.new_balance.as_deref(), Some("0.5"));
    assert_eq!(
        signer.submitted()[0].args.as_slice(),
        ["0xabc", "500000000000000000", "7", "1999999999"]
    );
    let confirms = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|s| s.url == "/airdrop/confirm")
        .count();
    assert_eq!(confirms, 2);
}
