use tracing::{info_span, Span};

/// Span for a lifecycle operation (`install`, `enable`, ...) on one plugin.
pub fn plugin_span(name: &str, operation: &str) -> Span {
    info_span!("plugin", name = %name, op = %operation)
}

/// Span for a repository synchronization or lookup.
pub fn repo_span(name: &str) -> Span {
    info_span!("repo", name = %name)
}

/// Span for one hook or lifecycle script run.
pub fn hook_span(plugin: &str, phase: &str) -> Span {
    info_span!("hook", plugin = %plugin, phase = %phase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::EnvFilter;

    fn with_subscriber<F>(f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let subscriber = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(EnvFilter::new("trace"))
            .finish();

        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn test_span_nesting() {
        with_subscriber(|| {
            let plugin = plugin_span("git-extras", "install");
            let _outer = plugin.enter();

            let repo = repo_span("community");
            let _middle = repo.enter();

            let hook = hook_span("git-extras", "pre-install");
            let _inner = hook.enter();

            tracing::info!("nested operation");
        });
    }

    #[tokio::test]
    async fn test_context_propagation_across_async() {
        use tracing::Instrument;

        let outer = plugin_span("tool-a", "enable");
        let future = async {
            let inner = hook_span("tool-a", "init");
            async { tracing::info!("init ran") }.instrument(inner).await;
        };
        future.instrument(outer).await;
    }
}
