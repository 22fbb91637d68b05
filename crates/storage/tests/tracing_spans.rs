//! Verifies that `#[instrument]` annotations on `MemoryBackend` produce spans.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use casket_storage::{MemoryBackend, StorageBackend};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

#[tokio::test]
async fn backend_operations_create_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    backend.set(b"key-1".to_vec(), b"value-1".to_vec()).await.expect("set");
    let _ = backend.get(b"key-1").await;
    backend.compare_and_set(b"key-2", None, b"v".to_vec()).await.expect("cas");
    backend.delete(b"key-1").await.expect("delete");

    let recorded = spans.lock().expect("lock poisoned");
    for name in ["set", "get", "compare_and_set", "delete"] {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
}

#[tokio::test]
async fn transaction_commit_creates_span() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    let mut txn = backend.transaction().await.expect("txn");
    txn.set(b"k".to_vec(), b"v".to_vec());
    txn.commit().await.expect("commit");

    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == "commit"), "expected a 'commit' span, got: {recorded:?}");
}
