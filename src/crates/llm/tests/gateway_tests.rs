use futures::StreamExt;
use llm::testing::{ScriptedFailure, ScriptedGateway, ScriptedRound};
use llm::{CompletionGateway, CompletionRequest, FinishReason, Message, StreamEvent, Usage};
use std::sync::Arc;

fn request(prefill: &str) -> CompletionRequest {
    CompletionRequest::new(
        "test-model",
        vec![
            Message::system("sys"),
            Message::user("build it"),
            Message::assistant(prefill),
        ],
    )
    .with_stream(true)
}

#[tokio::test]
async fn test_gateway_as_trait_object() {
    let gateway: Arc<dyn CompletionGateway> = Arc::new(
        ScriptedGateway::new()
            .reply_chunks(["{\"a\":", " 1}"], FinishReason::Stop)
            .fail(ScriptedFailure::Provider("overloaded".into())),
    );

    let events: Vec<StreamEvent> = gateway
        .stream(request(""))
        .await
        .unwrap()
        .map(|event| event.unwrap())
        .collect()
        .await;
    assert_eq!(events.len(), 3);
    assert_eq!(
        events.last(),
        Some(&StreamEvent::Finish {
            reason: FinishReason::Stop
        })
    );

    let err = gateway.complete(request("")).await.unwrap_err();
    assert!(!err.is_auth_error());
    assert_eq!(gateway.name(), "scripted");
}

#[tokio::test]
async fn test_complete_folds_stream_into_response() {
    let gateway = ScriptedGateway::new().then(ScriptedRound::Reply {
        chunks: vec!["<div>".into(), "</div>".into()],
        finish_reason: Some(FinishReason::Length),
        usage: Some(Usage::new(12, 4)),
    });

    let response = gateway.complete(request("<html>")).await.unwrap();
    assert_eq!(response.content, "<div></div>");
    assert!(response.finish_reason.unwrap().is_length());
    assert_eq!(response.usage.unwrap().total_tokens, 16);

    let recorded = gateway.requests();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].prefill(), Some("<html>"));
}

#[tokio::test]
async fn test_auth_failure_is_classified() {
    let gateway = ScriptedGateway::new().fail(ScriptedFailure::Auth("bad key".into()));

    let err = gateway.stream(request("")).await.err().unwrap();
    assert!(err.is_auth_error());
    assert!(!err.is_transport_error());
    assert_eq!(gateway.calls(), 1);
}
