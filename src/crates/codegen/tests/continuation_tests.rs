use codegen::{ContinuationConfig, ContinuationEngine, StopReason};
use llm::testing::{ScriptedGateway, ScriptedRound};
use llm::{FinishReason, Usage};
use proptest::prelude::*;
use proptest::test_runner::Config;
use std::sync::Arc;
use std::time::Duration;

fn config(max_loops: u32) -> ContinuationConfig {
    ContinuationConfig {
        max_loops,
        round_delay: Duration::ZERO,
        ..ContinuationConfig::default()
    }
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(Config::with_cases(64))]
    #[test]
    fn truncated_rounds_are_stitched(
        truncated in prop::collection::vec("[a-z{}\":, ]{1,24}", 0..8),
        last in "[a-z{}\": ]{1,24}"
    ) {
        let mut gateway = ScriptedGateway::new();
        for chunk in &truncated {
            gateway = gateway.reply(chunk.clone(), FinishReason::Length);
        }
        let gateway = Arc::new(gateway.reply(last.clone(), FinishReason::Stop));
        let engine = ContinuationEngine::new(gateway.clone(), config(20));

        let output = block_on(engine.run("sys", "user")).unwrap();

        let expected = format!("{}{}", truncated.concat(), last);
        prop_assert_eq!(gateway.calls(), truncated.len() + 1);
        prop_assert_eq!(output.rounds as usize, truncated.len() + 1);
        prop_assert_eq!(output.text, expected);
        prop_assert_eq!(output.stop, StopReason::Completed);
    }

    #[test]
    fn endless_truncation_stops_at_limit(max_loops in 1u32..25) {
        let gateway = Arc::new(
            ScriptedGateway::new().repeat(ScriptedRound::reply("x", FinishReason::Length)),
        );
        let engine = ContinuationEngine::new(gateway.clone(), config(max_loops));

        let output = block_on(engine.run("sys", "user")).unwrap();

        prop_assert_eq!(gateway.calls(), max_loops as usize);
        prop_assert_eq!(output.stop, StopReason::MaxLoops);
        prop_assert_eq!(output.text, "x".repeat(max_loops as usize));
        prop_assert_eq!(output.finish_reason, Some(FinishReason::Length));
    }
}

#[tokio::test]
async fn test_default_limit_is_twenty_rounds() {
    let gateway = Arc::new(
        ScriptedGateway::new().repeat(ScriptedRound::reply("{", FinishReason::Length)),
    );
    let engine = ContinuationEngine::new(
        gateway.clone(),
        ContinuationConfig {
            round_delay: Duration::ZERO,
            ..ContinuationConfig::default()
        },
    );

    let output = engine.run("sys", "user").await.unwrap();
    assert_eq!(output.rounds, 20);
    assert_eq!(gateway.calls(), 20);
    assert!(!output.is_complete());
}

#[tokio::test]
async fn test_usage_accumulates_across_rounds() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .then(ScriptedRound::Reply {
                chunks: vec!["{\"a\":".into()],
                finish_reason: Some(FinishReason::Length),
                usage: Some(Usage::new(100, 50)),
            })
            .then(ScriptedRound::Reply {
                chunks: vec!["1}".into()],
                finish_reason: Some(FinishReason::Stop),
                usage: Some(Usage::new(150, 10)),
            }),
    );
    let engine = ContinuationEngine::new(gateway, config(20));

    let output = engine.run("sys", "user").await.unwrap();
    assert_eq!(output.usage, Usage::new(250, 60));
}

#[tokio::test]
async fn test_stream_break_propagates() {
    let gateway = Arc::new(ScriptedGateway::new().then(ScriptedRound::BreakMidStream {
        chunks: vec!["{\"package.json\"".into()],
        message: "connection reset".into(),
    }));
    let engine = ContinuationEngine::new(gateway, config(20));

    assert!(engine.run("sys", "user").await.is_err());
}

#[tokio::test]
async fn test_finish_without_reason_counts_as_complete() {
    let gateway = Arc::new(ScriptedGateway::new().then(ScriptedRound::Reply {
        chunks: vec!["{}".into()],
        finish_reason: None,
        usage: None,
    }));
    let engine = ContinuationEngine::new(gateway.clone(), config(20));

    let output = engine.run("sys", "user").await.unwrap();
    assert_eq!(output.stop, StopReason::Completed);
    assert_eq!(gateway.calls(), 1);
}
