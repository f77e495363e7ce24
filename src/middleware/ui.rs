use async_trait::async_trait;
use std::time::Duration;

use super::UI_ORDER;
use crate::context::ChatContext;
use crate::pipeline::{ChatMiddleware, Next};
use crate::ui::{CallbackService, ChatUi};
use crate::Result;

/// Installs [`ChatUi`] on the context.
pub struct UiMiddleware {
    callbacks: CallbackService,
    timeout: Duration,
}

impl UiMiddleware {
    pub fn new(callbacks: CallbackService, timeout: Duration) -> Self {
        Self { callbacks, timeout }
    }
}

#[async_trait]
impl ChatMiddleware for UiMiddleware {
    fn order(&self) -> i32 {
        UI_ORDER
    }

    fn name(&self) -> &str {
        "ui"
    }

    async fn invoke(&self, ctx: &mut ChatContext, next: Next<'_>) -> Result<()> {
        ctx.ui = Some(ChatUi::new(
            self.callbacks.clone(),
            ctx.result.clone(),
            self.timeout,
        ));
        next.run(ctx).await
    }
}
