use async_trait::async_trait;
use std::sync::Arc;

use super::CHOOSE_LLM_ORDER;
use crate::context::ChatContext;
use crate::i18n::{self, Localizer};
use crate::pipeline::{ChatMiddleware, Next};
use crate::{Error, Result};

/// Keeps the requested model when it is available, otherwise picks the first one.
pub struct ChooseLlmMiddleware {
    localizer: Arc<dyn Localizer>,
}

impl ChooseLlmMiddleware {
    pub fn new(localizer: Arc<dyn Localizer>) -> Self {
        Self { localizer }
    }
}

#[async_trait]
impl ChatMiddleware for ChooseLlmMiddleware {
    fn order(&self) -> i32 {
        CHOOSE_LLM_ORDER
    }

    fn name(&self) -> &str {
        "choose_llm"
    }

    async fn invoke(&self, ctx: &mut ChatContext, next: Next<'_>) -> Result<()> {
        let available = ctx
            .llm
            .as_ref()
            .map(|llm| ctx.llms.contains(llm))
            .unwrap_or(false);

        if !available {
            let Some(first) = ctx.llms.first().cloned() else {
                return Err(Error::chat(self.localizer.t(i18n::ERROR_MISSING_LLM)));
            };
            tracing::debug!(
                conversation_id = ctx.conversation_id,
                requested = ?ctx.llm,
                chosen = %first,
                "falling back to first available model"
            );
            ctx.llm = Some(first);
        }

        next.run(ctx).await
    }
}
