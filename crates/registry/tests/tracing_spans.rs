//! Registry spans carry redacted ticket ids only.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use casket_registry::{TicketRegistry, testutil};
use casket_ticket::testutil::mock_factory;
use tracing::{
    Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<(String, String)>>>,
}

struct FieldText<'a>(&'a mut String);

impl Visit for FieldText<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.push_str(&format!("{}={:?} ", field.name(), value));
    }
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            let mut fields = String::new();
            attrs.record(&mut FieldText(&mut fields));
            self.spans.lock().expect("lock poisoned").push((span.name().to_owned(), fields));
        }
    }
}

#[tokio::test]
async fn registry_spans_redact_ticket_ids() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let registry = testutil::memory_registry();
    let (factory, _clock) = mock_factory();
    let mut tgt = testutil::seed_session(&registry, &factory, "casuser").await;
    let st = testutil::seed_service_ticket(&registry, &factory, &mut tgt, "https://app").await;
    registry.get_ticket(st.id()).await.expect("get");
    registry.delete_ticket(tgt.id()).await.expect("delete");

    let recorded = spans.lock().expect("lock poisoned");
    for name in ["add_ticket", "save_all", "get_ticket", "delete_ticket"] {
        assert!(recorded.iter().any(|(s, _)| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
    for (name, fields) in recorded.iter() {
        assert!(!fields.contains(tgt.id()), "span '{name}' leaked a TGT id: {fields}");
        assert!(!fields.contains(st.id()), "span '{name}' leaked an ST id: {fields}");
    }
    assert!(
        recorded.iter().any(|(_, fields)| fields.contains("****")),
        "expected at least one redacted id, got: {recorded:?}"
    );
}
