// Gateway client against a local mock server
use mockito::Matcher;
use skillforge::error::BackendError;
use skillforge::llm::client::{CompletionRequest, TextGenerator};
use skillforge::llm::gateway::GatewayClient;
use std::time::Duration;

fn client(url: &str) -> GatewayClient {
    GatewayClient::new("test-key".to_string(), "gpt-4".to_string(), url.to_string()).unwrap()
}

#[tokio::test]
async fn test_plain_completion_extracts_first_choice() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "model": "gpt-4",
            "stream": false,
            "max_tokens": 1000
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": "Hello"}}]}"#)
        .create_async()
        .await;

    let request = CompletionRequest::prompt("hi").with_max_tokens(1000);
    let text = client(&server.url()).complete(&request).await.unwrap();

    assert_eq!(text, "Hello");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_error_status_surfaces_message() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(401)
        .with_body(r#"{"error": {"message": "Invalid API key", "type": "auth"}}"#)
        .create_async()
        .await;

    let err = client(&server.url())
        .complete(&CompletionRequest::prompt("hi"))
        .await
        .unwrap_err();

    match &err {
        BackendError::Status { status, message } => {
            assert_eq!(*status, 401);
            assert_eq!(message, "Invalid API key");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().starts_with("backend call failed"));
}

#[tokio::test]
async fn test_server_error_with_plain_body() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(502)
        .with_body("Bad Gateway")
        .create_async()
        .await;

    let err = client(&server.url())
        .complete(&CompletionRequest::prompt("hi"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BackendError::Status { status: 502, ref message } if message == "Bad Gateway"
    ));
}

#[tokio::test]
async fn test_empty_choices() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(r#"{"choices": []}"#)
        .create_async()
        .await;

    let err = client(&server.url())
        .complete(&CompletionRequest::prompt("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::EmptyResponse));
}

#[tokio::test]
async fn test_streaming_concatenates_fragments_in_order() {
    let mut server = mockito::Server::new_async().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: [DONE]\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" ignored\"}}]}\n\n",
    );
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(serde_json::json!({"stream": true})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let request = CompletionRequest::prompt("count").with_stream(true);
    let text = client(&server.url()).complete(&request).await.unwrap();
    assert_eq!(text, "Hello");
}

#[tokio::test]
async fn test_streaming_without_content_is_empty_response() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body("data: [DONE]\n\n")
        .create_async()
        .await;

    let request = CompletionRequest::prompt("count").with_stream(true);
    let err = client(&server.url()).complete(&request).await.unwrap_err();
    assert!(matches!(err, BackendError::EmptyResponse));
}

#[tokio::test]
async fn test_unreachable_host_is_transport_error() {
    let request = CompletionRequest::prompt("hi").with_timeout(Duration::from_secs(5));
    let err = client("http://127.0.0.1:1").complete(&request).await.unwrap_err();
    assert!(matches!(
        err,
        BackendError::Transport(_) | BackendError::Timeout(_)
    ));
    assert!(err.to_string().starts_with("backend call failed"));
}
