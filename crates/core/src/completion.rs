use crate::circuit::CircuitBreaker;
use crate::error::ProviderError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionOutcome {
    pub text: String,
    /// True when the answer came from the local fallback.
    pub degraded: bool,
}

/// Run `prompt` through `model` unless `breaker` is open; on an outage trip
/// the breaker and answer with `fallback()` instead.
pub async fn complete_with_fallback<M, F>(
    model: &M,
    breaker: &CircuitBreaker,
    prompt: &str,
    timeout: Duration,
    fallback: F,
) -> Result<CompletionOutcome, ProviderError>
where
    M: CompletionModel + ?Sized,
    F: FnOnce() -> String,
{
    if breaker.is_open() {
        return Ok(CompletionOutcome {
            text: fallback(),
            degraded: true,
        });
    }

    let attempt = tokio::time::timeout(timeout, model.complete(prompt))
        .await
        .unwrap_or(Err(ProviderError::Timeout(timeout)));

    match attempt {
        Ok(text) => Ok(CompletionOutcome {
            text,
            degraded: false,
        }),
        Err(error) if error.is_unavailable() => {
            warn!(model = model.model_name(), %error, "completion failed, answering from fallback");
            breaker.trip(&error.to_string());
            Ok(CompletionOutcome {
                text: fallback(),
                degraded: true,
            })
        }
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::BreakerReset;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedModel {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ProviderError::Unavailable("429 quota".to_string()))
            } else {
                Ok(format!("answer to: {prompt}"))
            }
        }
    }

    #[tokio::test]
    async fn outage_trips_breaker_and_later_calls_skip_provider() {
        let model = ScriptedModel {
            fail: true,
            calls: AtomicUsize::new(0),
        };
        let breaker =
            CircuitBreaker::new("completion", BreakerReset::After(Duration::from_secs(600)));

        let first = complete_with_fallback(&model, &breaker, "q", Duration::from_secs(1), || {
            "excerpt".to_string()
        })
        .await
        .unwrap();
        assert!(first.degraded);
        assert_eq!(first.text, "excerpt");
        assert!(breaker.is_open());

        let second = complete_with_fallback(&model, &breaker, "q", Duration::from_secs(1), || {
            "excerpt".to_string()
        })
        .await
        .unwrap();
        assert!(second.degraded);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn healthy_provider_answers() {
        let model = ScriptedModel {
            fail: false,
            calls: AtomicUsize::new(0),
        };
        let breaker = CircuitBreaker::default();
        let timeout = Duration::from_secs(1);
        let outcome = complete_with_fallback(&model, &breaker, "leave?", timeout, String::new)
            .await
            .unwrap();
        assert!(!outcome.degraded);
        assert_eq!(outcome.text, "answer to: leave?");
    }
}
