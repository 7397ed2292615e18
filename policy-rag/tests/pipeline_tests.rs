//! End-to-end behavior of the assistant: lazy build, fallback, retries and snapshots.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{CountingEmbedder, ScriptedCompletion, write_handbook, write_pdf};
use policy_rag::{
    AssistantConfig, CompletionError, IndexState, PolicyAssistant, Provenance,
    RagError, RetryPolicy,
};

fn config(docs_dir: &std::path::Path) -> AssistantConfig {
    AssistantConfig { docs_dir: docs_dir.to_path_buf(), ..AssistantConfig::default() }
}

fn assistant(
    config: AssistantConfig,
    embedder: Arc<CountingEmbedder>,
    completion: Arc<ScriptedCompletion>,
) -> PolicyAssistant {
    PolicyAssistant::builder()
        .config(config)
        .embedding_provider(embedder)
        .completion_client(completion)
        .build()
        .unwrap()
}

#[tokio::test]
async fn empty_corpus_answers_with_fallback_and_never_calls_endpoint() {
    let temp = tempfile::tempdir().unwrap();
    let docs = temp.path().join("policies");
    let completion = Arc::new(ScriptedCompletion::always("should not be used"));
    let assistant = assistant(config(&docs), Arc::new(CountingEmbedder::new()), completion.clone());

    assert_eq!(assistant.state(), IndexState::Uninitialized);
    let answer = assistant.ask("What is the attendance policy?").await.unwrap();

    assert_eq!(answer.text, policy_rag::fallback_answer(&docs));
    assert!(answer.text.contains(&docs.display().to_string()));
    assert!(answer.is_fallback());
    assert!(answer.sources.is_empty());
    assert_eq!(completion.calls(), 0);
    assert_eq!(assistant.state(), IndexState::NoDocuments);
    assert!(docs.is_dir(), "missing documents directory should be created");

    // The empty result is cached like an index.
    assistant.ask("And the dress code?").await.unwrap();
    assert_eq!(assistant.build_attempts(), 1);
    assert_eq!(completion.calls(), 0);
}

#[tokio::test]
async fn tuition_question_is_grounded_in_the_fee_page() {
    let temp = tempfile::tempdir().unwrap();
    write_handbook(temp.path());
    let completion = Arc::new(ScriptedCompletion::always("Tuition is due by the 5th of each month."));
    let assistant = assistant(config(temp.path()), Arc::new(CountingEmbedder::new()), completion.clone());

    let answer = assistant.ask("When is tuition due?").await.unwrap();

    assert_eq!(answer.text, "Tuition is due by the 5th of each month.");
    assert!(!answer.is_fallback());
    assert_eq!(answer.sources[0], Provenance { file_name: "fees.pdf".into(), page: 0 });
    assert_eq!(answer.sources[0].to_string(), "fees.pdf, page 1");
    assert_eq!(answer.prompt_version.as_deref(), Some("policy-qa/v1"));

    let prompt = completion.last_prompt().unwrap();
    assert!(prompt.contains("Iqra University"));
    assert!(prompt.contains("Tuition is due by the 5th of each month."));
    assert!(prompt.contains("Question: When is tuition due?"));
    assert_eq!(completion.calls(), 1);
    assert_eq!(assistant.state(), IndexState::Ready { chunks: 2 });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_questions_share_one_build() {
    let temp = tempfile::tempdir().unwrap();
    write_handbook(temp.path());
    let embedder = Arc::new(CountingEmbedder::new().slow(Duration::from_millis(50)));
    let completion = Arc::new(ScriptedCompletion::always("ok"));
    let assistant = Arc::new(assistant(config(temp.path()), embedder.clone(), completion.clone()));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let assistant = Arc::clone(&assistant);
            tokio::spawn(async move {
                assistant.ask(&format!("question {i} about tuition")).await?;
                // the index this caller answered from
                Ok::<_, RagError>(assistant.index())
            })
        })
        .collect();
    let seen: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|result| result.unwrap().unwrap().expect("index built"))
        .collect();

    assert_eq!(assistant.build_attempts(), 1);
    assert_eq!(embedder.batch_calls(), 1);
    assert_eq!(completion.calls(), 16);
    for index in &seen[1..] {
        assert!(Arc::ptr_eq(&seen[0], index), "callers observed different index instances");
    }
    assert!(Arc::ptr_eq(&seen[0], &assistant.index().unwrap()));
}

#[tokio::test]
async fn endpoint_failure_does_not_poison_later_questions() {
    let temp = tempfile::tempdir().unwrap();
    write_handbook(temp.path());
    let completion = Arc::new(ScriptedCompletion::new(vec![
        Err(CompletionError::Timeout(Duration::from_secs(30))),
        Ok("By the 5th.".to_string()),
    ]));
    let assistant = assistant(config(temp.path()), Arc::new(CountingEmbedder::new()), completion);

    let err = assistant.ask("When is tuition due?").await.unwrap_err();
    assert!(matches!(err, RagError::Completion(CompletionError::Timeout(_))));
    assert!(err.is_transient());

    let answer = assistant.ask("When is tuition due?").await.unwrap();
    assert_eq!(answer.text, "By the 5th.");
    assert_eq!(assistant.build_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_build_backs_off_then_retries() {
    let temp = tempfile::tempdir().unwrap();
    write_handbook(temp.path());
    let embedder = Arc::new(CountingEmbedder::new().failing(1));
    let mut config = config(temp.path());
    config.retry = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_secs(1),
        max_backoff: Duration::from_secs(60),
    };
    let assistant = assistant(config, embedder, Arc::new(ScriptedCompletion::always("ok")));

    let err = assistant.ask("When is tuition due?").await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingError { .. }));
    assert!(matches!(assistant.state(), IndexState::BuildFailed { attempts: 1, .. }));

    let err = assistant.ask("When is tuition due?").await.unwrap_err();
    assert!(matches!(err, RagError::IndexUnavailable { .. }));
    assert_eq!(assistant.build_attempts(), 1);

    tokio::time::advance(Duration::from_secs(1)).await;

    assistant.ask("When is tuition due?").await.unwrap();
    assert_eq!(assistant.build_attempts(), 2);
    assert!(matches!(assistant.state(), IndexState::Ready { .. }));
}

#[tokio::test(start_paused = true)]
async fn exhausted_build_failure_is_cached() {
    let temp = tempfile::tempdir().unwrap();
    write_handbook(temp.path());
    let embedder = Arc::new(CountingEmbedder::new().failing(usize::MAX));
    let mut config = config(temp.path());
    config.retry = RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_secs(1),
        max_backoff: Duration::from_secs(1),
    };
    let assistant = assistant(config, embedder.clone(), Arc::new(ScriptedCompletion::always("ok")));

    assert!(assistant.ask("q").await.is_err());
    tokio::time::advance(Duration::from_secs(2)).await;

    let err = assistant.ask("q").await.unwrap_err();
    assert!(matches!(err, RagError::IndexBuildFailed { attempts: 2, .. }));

    tokio::time::advance(Duration::from_secs(120)).await;
    let err = assistant.ask("q").await.unwrap_err();
    assert!(matches!(err, RagError::IndexBuildFailed { attempts: 2, .. }));
    assert!(!err.is_transient());
    assert_eq!(assistant.build_attempts(), 2);
    assert_eq!(embedder.batch_calls(), 2);
}

#[tokio::test]
async fn blank_question_is_rejected_before_any_build() {
    let temp = tempfile::tempdir().unwrap();
    write_handbook(temp.path());
    let assistant = assistant(
        config(temp.path()),
        Arc::new(CountingEmbedder::new()),
        Arc::new(ScriptedCompletion::always("ok")),
    );

    let err = assistant.ask("   ").await.unwrap_err();
    assert!(matches!(err, RagError::InvalidQuery(_)));
    assert_eq!(assistant.build_attempts(), 0);
}

#[tokio::test]
async fn malformed_pdf_does_not_block_the_rest_of_the_corpus() {
    let temp = tempfile::tempdir().unwrap();
    write_handbook(temp.path());
    std::fs::write(temp.path().join("corrupt.pdf"), b"%PDF-1.4 truncated").unwrap();
    let assistant = assistant(
        config(temp.path()),
        Arc::new(CountingEmbedder::new()),
        Arc::new(ScriptedCompletion::always("ok")),
    );

    let state = assistant.initialize().await.unwrap();
    assert!(matches!(state, IndexState::Ready { chunks } if chunks > 0));
}

#[tokio::test]
async fn snapshot_is_reused_when_corpus_and_model_match() {
    let temp = tempfile::tempdir().unwrap();
    let docs = temp.path().join("policies");
    std::fs::create_dir_all(&docs).unwrap();
    write_handbook(&docs);
    let mut config = config(&docs);
    config.index_snapshot = Some(temp.path().join("cache/index.json"));

    let first = Arc::new(CountingEmbedder::new());
    assistant(config.clone(), first.clone(), Arc::new(ScriptedCompletion::always("ok")))
        .initialize()
        .await
        .unwrap();
    assert_eq!(first.batch_calls(), 1);
    assert!(temp.path().join("cache/index.json").is_file());

    let second = Arc::new(CountingEmbedder::new());
    let reloaded = assistant(config.clone(), second.clone(), Arc::new(ScriptedCompletion::always("ok")));
    let answer = reloaded.ask("When is tuition due?").await.unwrap();
    assert_eq!(second.batch_calls(), 0);
    assert_eq!(answer.sources[0].file_name, "fees.pdf");

    // A different model identity forces a rebuild.
    let other = Arc::new(CountingEmbedder::with_dimensions(64));
    assistant(config.clone(), other.clone(), Arc::new(ScriptedCompletion::always("ok")))
        .initialize()
        .await
        .unwrap();
    assert_eq!(other.batch_calls(), 1);

    // So does a changed corpus.
    write_pdf(&docs, "parking.pdf", &[&["Parking permits are issued by the security office."]]);
    let changed = Arc::new(CountingEmbedder::with_dimensions(64));
    let state = assistant(config, changed.clone(), Arc::new(ScriptedCompletion::always("ok")))
        .initialize()
        .await
        .unwrap();
    assert_eq!(changed.batch_calls(), 1);
    assert_eq!(state, IndexState::Ready { chunks: 3 });
}

#[tokio::test]
async fn changed_chunk_settings_invalidate_the_snapshot() {
    let temp = tempfile::tempdir().unwrap();
    let docs = temp.path().join("policies");
    std::fs::create_dir_all(&docs).unwrap();
    write_handbook(&docs);
    let mut config = config(&docs);
    config.index_snapshot = Some(temp.path().join("cache/index.json"));

    let first = Arc::new(CountingEmbedder::new());
    let state = assistant(config.clone(), first.clone(), Arc::new(ScriptedCompletion::always("ok")))
        .initialize()
        .await
        .unwrap();
    assert_eq!(state, IndexState::Ready { chunks: 2 });

    // Same documents and model, smaller windows: the old chunks must not be served.
    config.rag.chunk_size = 20;
    config.rag.chunk_overlap = 5;
    let resized = Arc::new(CountingEmbedder::new());
    let state = assistant(config.clone(), resized.clone(), Arc::new(ScriptedCompletion::always("ok")))
        .initialize()
        .await
        .unwrap();
    assert_eq!(resized.batch_calls(), 1);
    let IndexState::Ready { chunks } = state else { panic!("unexpected state {state:?}") };
    assert!(chunks > 2, "expected smaller chunks, got {chunks}");

    // The rewritten snapshot now matches the new settings.
    let again = Arc::new(CountingEmbedder::new());
    let reloaded = assistant(config, again.clone(), Arc::new(ScriptedCompletion::always("ok")));
    assert_eq!(reloaded.initialize().await.unwrap(), IndexState::Ready { chunks });
    assert_eq!(again.batch_calls(), 0);
    assert!(reloaded.index().unwrap().chunks().iter().all(|c| c.text.chars().count() <= 20));
}
