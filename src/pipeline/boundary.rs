//! The outermost middleware: turns any failure into one `error` event.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::{ChatMiddleware, Next};
use crate::classify::{classify, ErrorClass};
use crate::context::ChatContext;
use crate::i18n::Localizer;
use crate::{Error, ErrorContext, Result};

/// Order reserved for the exception boundary.
pub const BOUNDARY_ORDER: i32 = -1000;

/// Catches errors (and panics) from everything it wraps, classifies them and writes a
/// localized `error` event. Never propagates.
pub struct ExceptionBoundary {
    localizer: Arc<dyn Localizer>,
}

impl ExceptionBoundary {
    pub fn new(localizer: Arc<dyn Localizer>) -> Self {
        Self { localizer }
    }
}

#[async_trait]
impl ChatMiddleware for ExceptionBoundary {
    fn order(&self) -> i32 {
        BOUNDARY_ORDER
    }

    fn name(&self) -> &str {
        "exception_boundary"
    }

    async fn invoke(&self, ctx: &mut ChatContext, next: Next<'_>) -> Result<()> {
        let outcome = AssertUnwindSafe(next.run(ctx)).catch_unwind().await;

        let err = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => err,
            Err(panic) => {
                let details = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                Error::runtime_with_context(
                    "middleware panicked",
                    ErrorContext::new()
                        .with_details(details)
                        .with_source("exception_boundary"),
                )
            }
        };

        let classification = classify(&err, self.localizer.as_ref());
        match (&err, classification.class) {
            (Error::Cancelled, _) => {
                tracing::info!(conversation_id = ctx.conversation_id, "turn cancelled by caller");
            }
            (_, ErrorClass::DomainChatError) => {
                tracing::warn!(
                    conversation_id = ctx.conversation_id,
                    error = %err,
                    "turn rejected"
                );
            }
            (_, class) => {
                tracing::error!(
                    conversation_id = ctx.conversation_id,
                    class = %class,
                    error = %err,
                    "turn failed"
                );
            }
        }

        ctx.failure = Some(classification.class);
        ctx.result.error(classification.message).await
    }
}
