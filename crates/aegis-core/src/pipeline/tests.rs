use super::*;
use crate::config::QuotaConfig;
use crate::degradation::OutcomeKind;
use crate::quota::LocalQuotaStore;
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;

/// Provider that replays scripted results, then echoes the prompt
#[derive(Default)]
struct ScriptedProvider {
    script: Mutex<VecDeque<aegis_llm::Result<String>>>,
    latency: Duration,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    events: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    fn scripted(results: Vec<aegis_llm::Result<String>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &Prompt) -> aegis_llm::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let text = prompt
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.events.lock().unwrap().push(format!("start {text}"));
        sleep(self.latency).await;
        self.events.lock().unwrap().push(format!("end {text}"));

        self.running.fetch_sub(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(format!("echo: {text}")))
    }
}

fn resilience(limit: u64, capacity: usize) -> ResilienceConfig {
    let mut config = ResilienceConfig::default();
    config.quota = QuotaConfig {
        request_limit: limit,
        window_secs: 60,
        ..QuotaConfig::default()
    };
    config.concurrency.max_concurrency = capacity;
    config
}

fn pipeline_with(
    config: &ResilienceConfig,
    provider: Arc<ScriptedProvider>,
    assembler: Arc<dyn ContextAssembler>,
) -> AssistantPipeline {
    let store = LocalQuotaStore::new(config.quota.window(), config.quota.local_max_keys);
    AssistantPipeline::from_config(config, Arc::new(store), provider, assembler)
}

fn pipeline(config: &ResilienceConfig, provider: Arc<ScriptedProvider>) -> AssistantPipeline {
    pipeline_with(config, provider, Arc::new(PassthroughAssembler::default()))
}

#[tokio::test(start_paused = true)]
async fn test_generated_outcome() {
    let provider = Arc::new(ScriptedProvider::default());
    let pipeline = pipeline(&resilience(5, 2), provider.clone());

    let outcome = pipeline
        .handle(&InboundMessage::new("42", "hello"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.kind(), OutcomeKind::Generated);
    assert_eq!(outcome.text(), "echo: hello");
    assert_eq!(pipeline.gate().available(), 2);
    assert_eq!(pipeline.provider_name(), "scripted");
}

#[tokio::test(start_paused = true)]
async fn test_denied_request_never_reaches_provider() {
    let provider = Arc::new(ScriptedProvider::default());
    let mut assembler = MockContextAssembler::new();
    assembler
        .expect_assemble()
        .times(1)
        .returning(|m| Prompt::user(m.text.clone()));
    let pipeline = pipeline_with(&resilience(1, 2), provider.clone(), Arc::new(assembler));
    let cancel = CancellationToken::new();

    let first = pipeline.handle(&InboundMessage::new("a", "one"), &cancel).await.unwrap();
    let second = pipeline.handle(&InboundMessage::new("a", "two"), &cancel).await.unwrap();

    assert_eq!(first.kind(), OutcomeKind::Generated);
    match second {
        Outcome::Throttled {
            message,
            retry_after_secs,
        } => {
            assert_eq!(retry_after_secs, 60);
            assert!(message.contains("60 seconds"));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_slot_serializes_tenants() {
    let provider = Arc::new(ScriptedProvider::with_latency(Duration::from_millis(100)));
    let pipeline = pipeline(&resilience(5, 1), provider.clone());
    let cancel = CancellationToken::new();

    let from_a = InboundMessage::new("a", "from-a");
    let from_b = InboundMessage::new("b", "from-b");
    let (a, b) = tokio::join!(
        pipeline.handle(&from_a, &cancel),
        pipeline.handle(&from_b, &cancel),
    );
    assert!(a.is_ok() && b.is_ok());

    let events = provider.events();
    assert_eq!(events.len(), 4);
    assert!(events[0].starts_with("start"));
    assert!(events[1].starts_with("end"));
    assert_eq!(events[0][6..], events[1][4..]);
    assert!(events[2].starts_with("start"));
    assert_ne!(events[0], events[2]);
    assert_eq!(provider.peak(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_bounded_under_many_callers() {
    let provider = Arc::new(ScriptedProvider::with_latency(Duration::from_millis(50)));
    let pipeline = pipeline(&resilience(100, 3), provider.clone());
    let cancel = CancellationToken::new();

    let messages: Vec<_> = (0..30)
        .map(|i| InboundMessage::new(format!("tenant-{i}"), format!("q{i}")))
        .collect();
    let outcomes = join_all(messages.iter().map(|m| pipeline.handle(m, &cancel))).await;

    assert!(outcomes
        .iter()
        .all(|o| matches!(o, Ok(Outcome::Generated(_)))));
    assert_eq!(provider.calls(), 30);
    assert_eq!(provider.peak(), 3);
    assert_eq!(pipeline.gate().available(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recover() {
    let provider = Arc::new(ScriptedProvider::scripted(vec![
        Err(aegis_llm::Error::RateLimit {
            retry_after: Some(Duration::from_secs(5)),
        }),
        Err(aegis_llm::Error::Timeout(30)),
    ]));
    let pipeline = pipeline(&resilience(5, 1), provider.clone());

    let outcome = pipeline
        .handle(&InboundMessage::new("a", "hi"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.text(), "echo: hi");
    assert_eq!(provider.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_serve_fallback() {
    let provider = Arc::new(ScriptedProvider::scripted(
        (0..5)
            .map(|_| Err(aegis_llm::Error::ServerError("503".into())))
            .collect(),
    ));
    let pipeline = pipeline(&resilience(5, 1), provider.clone());

    let outcome = pipeline
        .handle(&InboundMessage::new("a", "hi"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(provider.calls(), 5);
    assert!(matches!(
        outcome,
        Outcome::Fallback {
            cause: Error::ExhaustedRetries { attempts: 5, .. },
            ..
        }
    ));
    assert_eq!(pipeline.gate().available(), 1);

    // Session remains usable
    let next = pipeline
        .handle(&InboundMessage::new("a", "again"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(next.kind(), OutcomeKind::Generated);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_serves_fallback_without_retry() {
    let provider = Arc::new(ScriptedProvider::scripted(vec![Err(aegis_llm::Error::Api {
        status: 401,
        message: "invalid key".into(),
    })]));
    let pipeline = pipeline(&resilience(5, 1), provider.clone());

    let outcome = pipeline
        .handle(&InboundMessage::new("a", "hi"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(provider.calls(), 1);
    assert!(matches!(
        outcome,
        Outcome::Fallback {
            cause: Error::PermanentDownstream { attempts: 1, .. },
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_waiter_and_holder_release_slot() {
    let provider = Arc::new(ScriptedProvider::with_latency(Duration::from_secs(3600)));
    let pipeline = pipeline(&resilience(5, 1), provider.clone());
    let holder_cancel = CancellationToken::new();
    let waiter_cancel = CancellationToken::new();

    let slow = InboundMessage::new("a", "slow");
    let queued = InboundMessage::new("b", "queued");
    let (holder, waiter, _) = tokio::join!(
        pipeline.handle(&slow, &holder_cancel),
        pipeline.handle(&queued, &waiter_cancel),
        async {
            sleep(Duration::from_secs(1)).await;
            waiter_cancel.cancel();
            sleep(Duration::from_secs(1)).await;
            holder_cancel.cancel();
        }
    );

    assert!(matches!(waiter, Err(Error::Cancelled)));
    assert!(matches!(holder, Err(Error::Cancelled)));
    assert_eq!(provider.calls(), 1);
    assert_eq!(pipeline.gate().available(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_releases_slot() {
    let provider = Arc::new(ScriptedProvider::scripted(vec![Err(
        aegis_llm::Error::Network("reset".into()),
    )]));
    let pipeline = pipeline(&resilience(5, 1), provider.clone());
    let cancel = CancellationToken::new();

    let message = InboundMessage::new("a", "hi");
    let (result, _) = tokio::join!(
        pipeline.handle(&message, &cancel),
        async {
            sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        }
    );

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(provider.calls(), 1);
    assert_eq!(pipeline.gate().available(), 1);
}

#[tokio::test]
async fn test_closed_gate_rejects() {
    let provider = Arc::new(ScriptedProvider::default());
    let pipeline = pipeline(&resilience(5, 1), provider.clone());
    pipeline.gate().close();

    let result = pipeline
        .handle(&InboundMessage::new("a", "hi"), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(Error::GateClosed)));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_short_command_is_not_counted() {
    let provider = Arc::new(ScriptedProvider::default());
    let pipeline = pipeline(&resilience(1, 1), provider.clone());
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        let outcome = pipeline.handle(&InboundMessage::new("a", "/help"), &cancel).await.unwrap();
        assert_eq!(outcome.kind(), OutcomeKind::Generated);
    }
    let usage = pipeline
        .admission()
        .usage(&crate::tenant::TenantId::new("a"))
        .await
        .unwrap();
    assert_eq!(usage.count, 0);
}

#[tokio::test]
async fn test_passthrough_assembler_system_prompt() {
    let assembler = PassthroughAssembler::with_system("Be brief.");
    let prompt = assembler.assemble(&InboundMessage::new("a", "hi")).await;

    assert_eq!(prompt.messages.len(), 2);
    assert_eq!(prompt.messages[0].content, "Be brief.");
    assert_eq!(prompt.messages[1].content, "hi");
}
