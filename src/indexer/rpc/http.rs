use alloy_json_rpc::RpcError as JsonRpcError;
use alloy_rpc_client::{ClientBuilder, RpcClient as AlloyRpcClient, Waiter};
use alloy_transport::{TransportError, TransportErrorKind};
use alloy_transport_http::Http;
use async_trait::async_trait;
use serde_json::Value;
use std::error::Error as StdError;
use std::time::Duration;
use url::Url;

use crate::indexer::rpc::{RpcCall, RpcClient, RpcResponse};
use crate::models::errors::RpcError;
use crate::utils::clean_error_body;

/// JSON-RPC over HTTP(S). Every chunk goes out as one alloy `BatchRequest`; replies are
/// matched back to their calls by request id.
pub struct HttpRpcClient {
    client: AlloyRpcClient,
}

impl HttpRpcClient {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Connection(e.to_string()))?;
        let transport = Http::with_client(http, url);
        Ok(Self {
            client: ClientBuilder::default().transport(transport, false),
        })
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn batch(&self, calls: &[RpcCall]) -> Result<Vec<RpcResponse>, RpcError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let mut batch = self.client.new_batch();
        let mut waiters = Vec::with_capacity(calls.len());
        for call in calls {
            let waiter: Waiter<Value> = batch
                .add_call(call.method, &call.params)
                .map_err(map_transport_error)?;
            waiters.push(waiter);
        }
        batch.send().await.map_err(map_transport_error)?;

        let mut responses = Vec::with_capacity(waiters.len());
        for waiter in waiters {
            responses.push(waiter.await.map_err(map_transport_error));
        }
        Ok(responses)
    }
}

/// Folds alloy's transport errors into the retry classification used by the stages.
fn map_transport_error(error: TransportError) -> RpcError {
    match error {
        JsonRpcError::ErrorResp(payload) => RpcError::Rpc {
            code: payload.code,
            message: payload.message.to_string(),
        },
        JsonRpcError::DeserError { err, text } => {
            RpcError::MalformedResponse(format!("{err}: {}", clean_error_body(&text)))
        }
        JsonRpcError::Transport(kind) => map_transport_kind(kind),
        other => RpcError::MalformedResponse(other.to_string()),
    }
}

fn map_transport_kind(kind: TransportErrorKind) -> RpcError {
    match kind {
        TransportErrorKind::HttpError(http) => RpcError::HttpStatus {
            status: http.status,
            body: clean_error_body(&http.body),
        },
        TransportErrorKind::MissingBatchResponse(id) => {
            RpcError::MalformedResponse(format!("no reply for request id {id:?}"))
        }
        TransportErrorKind::Custom(err) => map_custom_error(err.as_ref()),
        other => RpcError::Connection(other.to_string()),
    }
}

fn map_custom_error(err: &(dyn StdError + Send + Sync + 'static)) -> RpcError {
    match err.downcast_ref::<reqwest::Error>() {
        Some(e) if e.is_timeout() => RpcError::Timeout(e.to_string()),
        Some(e) if e.is_connect() => RpcError::Connection(e.to_string()),
        _ => RpcError::Io(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use serde_json::json;

    fn client_for(server: &Server) -> HttpRpcClient {
        let url = Url::parse(&server.url()).unwrap();
        HttpRpcClient::new(url, Duration::from_secs(5)).unwrap()
    }

    fn two_blocks() -> Vec<RpcCall> {
        vec![
            RpcCall::get_block_by_number(1, false),
            RpcCall::get_block_by_number(2, false),
        ]
    }

    #[tokio::test]
    async fn test_batch_replies_are_matched_by_id() {
        //* Given
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body_from_request(|request| {
                let calls: Vec<Value> = serde_json::from_slice(request.body().unwrap()).unwrap();
                // Answer in reverse order, echoing each call's block tag
                let replies: Vec<Value> = calls
                    .iter()
                    .rev()
                    .map(|call| json!({"jsonrpc": "2.0", "id": call["id"], "result": call["params"][0]}))
                    .collect();
                serde_json::to_vec(&replies).unwrap()
            })
            .create_async()
            .await;
        let client = client_for(&server);

        //* When
        let responses = client.batch(&two_blocks()).await.unwrap();

        //* Then
        mock.assert_async().await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].as_ref().unwrap(), &json!("0x1"));
        assert_eq!(responses[1].as_ref().unwrap(), &json!("0x2"));
    }

    #[tokio::test]
    async fn test_per_call_errors_stay_with_their_call() {
        //* Given
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body_from_request(|request| {
                let calls: Vec<Value> = serde_json::from_slice(request.body().unwrap()).unwrap();
                let replies = json!([
                    {"jsonrpc": "2.0", "id": calls[0]["id"], "result": null},
                    {"jsonrpc": "2.0", "id": calls[1]["id"], "error": {"code": -32000, "message": "header not found"}}
                ]);
                serde_json::to_vec(&replies).unwrap()
            })
            .create_async()
            .await;
        let client = client_for(&server);

        //* When
        let responses = client.batch(&two_blocks()).await.unwrap();

        //* Then
        assert_eq!(responses[0].as_ref().unwrap(), &Value::Null);
        assert!(matches!(
            responses[1],
            Err(RpcError::Rpc { code: -32000, .. })
        ));
    }

    #[tokio::test]
    async fn test_service_unavailable_is_retryable() {
        //* Given
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(503)
            .with_body("upstream unavailable")
            .create_async()
            .await;
        let client = client_for(&server);

        //* When
        let err = client.batch(&two_blocks()).await.unwrap_err();

        //* Then
        assert!(matches!(err, RpcError::HttpStatus { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retryable_and_html_is_stripped() {
        //* Given
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(400)
            .with_header("content-type", "text/html")
            .with_body("<html>\n<body>\nrequest too large\n</body>\n</html>")
            .create_async()
            .await;
        let client = client_for(&server);

        //* When
        let err = client.batch(&two_blocks()).await.unwrap_err();

        //* Then
        assert!(!err.is_retryable());
        match err {
            RpcError::HttpStatus { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "request too large");
            }
            other => panic!("expected an HTTP status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_whole_batch_error_object_is_not_retryable() {
        //* Given
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32600,"message":"batch too large"}}"#)
            .create_async()
            .await;
        let client = client_for(&server);

        //* When
        let result = client.batch(&two_blocks()).await;

        //* Then
        let errors: Vec<RpcError> = match result {
            Err(err) => vec![err],
            Ok(responses) => responses.into_iter().map(|r| r.unwrap_err()).collect(),
        };
        assert!(!errors.is_empty());
        assert!(errors.iter().all(|err| !err.is_retryable()));
    }

    #[tokio::test]
    async fn test_silent_endpoint_times_out_and_is_retryable() {
        //* Given
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        // Accept the connection and never answer
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        let client = HttpRpcClient::new(url, Duration::from_millis(200)).unwrap();

        //* When
        let err = client.batch(&two_blocks()).await.unwrap_err();

        //* Then
        assert!(matches!(err, RpcError::Timeout(_)), "got {err:?}");
        assert!(err.is_retryable());
    }
}
