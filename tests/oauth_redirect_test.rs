// End-to-end OAuth mode: token exchange against a mock endpoint, then a real
// listener answering with frontdoor.jsp?sid=<token>.

use frontdoor::credentials::{resolve_session, ConnectionString, ExchangeError, TokenClient};
use frontdoor::redirect::{RedirectResponse, ResponseStyle};
use frontdoor::server::{serve, ConnectionLimits};
use mockito::Server;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

#[tokio::test]
async fn test_oauth_session_redirect() {
    let mut token_server = Server::new_async().await;
    let token_mock = token_server
        .mock(
            "POST",
            "/services/oauth2/token?grant_type=refresh_token&client_id=abc&client_secret=secret1&refresh_token=tok123",
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"XYZ"}"#)
        .expect(1)
        .create_async()
        .await;

    let connection =
        ConnectionString::parse("force://abc:secret1:tok123@na1.salesforce.com").unwrap();
    let client = TokenClient::with_base_url(Duration::from_secs(5), token_server.url()).unwrap();
    let destination = resolve_session(&connection, &client, false).await.unwrap();

    let response = RedirectResponse::new(
        ResponseStyle::NativeRedirect,
        &destination.target_url(false),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        serve(listener, &response, &ConnectionLimits::default(), async {
            let _ = rx.await;
        })
        .await
    });

    // Two requests, one token exchange
    for _ in 0..2 {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut received = String::new();
        stream.read_to_string(&mut received).await.unwrap();

        assert!(received.starts_with("HTTP/1.1 303 See Other\r\n"));
        assert!(received
            .contains("\r\nLocation: https://na1.salesforce.com/secur/frontdoor.jsp?sid=XYZ\r\n"));
    }

    tx.send(()).unwrap();
    let stats = handle.await.unwrap();
    assert_eq!(stats.responded, 2);
    token_mock.assert_async().await;
}

#[tokio::test]
async fn test_oauth_exchange_failure_prevents_serving() {
    let mut token_server = Server::new_async().await;
    let _mock = token_server
        .mock("POST", mockito::Matcher::Any)
        .with_status(200)
        .with_body(r#"{"error":"invalid_grant"}"#)
        .create_async()
        .await;

    let connection =
        ConnectionString::parse("force://abc:secret1:tok123@na1.salesforce.com").unwrap();
    let client = TokenClient::with_base_url(Duration::from_secs(5), token_server.url()).unwrap();

    let err = resolve_session(&connection, &client, false)
        .await
        .unwrap_err();
    assert_eq!(err, ExchangeError::MissingAccessToken);
}
