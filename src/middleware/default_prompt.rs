use async_trait::async_trait;

use super::DEFAULT_PROMPT_ORDER;
use crate::context::ChatContext;
use crate::pipeline::{ChatMiddleware, Next};
use crate::Result;

/// Adds the configured system prompt when no other middleware contributed one.
pub struct DefaultPromptMiddleware {
    prompt: String,
}

impl DefaultPromptMiddleware {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl ChatMiddleware for DefaultPromptMiddleware {
    fn order(&self) -> i32 {
        DEFAULT_PROMPT_ORDER
    }

    fn name(&self) -> &str {
        "default_prompt"
    }

    async fn invoke(&self, ctx: &mut ChatContext, next: Next<'_>) -> Result<()> {
        if ctx.system_messages.is_empty() && !self.prompt.is_empty() {
            ctx.system_messages.push(self.prompt.clone());
        }
        next.run(ctx).await
    }
}
