//! Token quotas.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::{CHECK_USAGE_ORDER, STORE_USAGE_ORDER};
use crate::context::ChatContext;
use crate::i18n::{self, Localizer};
use crate::pipeline::{ChatMiddleware, Next};
use crate::store::{UsageRecord, UsageScope, UsageStore};
use crate::types::message::now_millis;
use crate::{Error, Result};

const DEFAULT_WINDOW: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Quotas of one user group. `None` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLimits {
    /// Tokens the whole group may consume per window.
    pub tokens: Option<u64>,
    /// Tokens each member may consume per window.
    pub user_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageLimits {
    pub groups: HashMap<String, GroupLimits>,
    /// Groups never limited (administrators, the default group).
    pub exempt_groups: HashSet<String>,
    /// Rolling window the quotas apply to, in seconds.
    pub window_secs: u64,
}

impl Default for UsageLimits {
    fn default() -> Self {
        Self {
            groups: HashMap::new(),
            exempt_groups: HashSet::new(),
            window_secs: DEFAULT_WINDOW.as_secs(),
        }
    }
}

impl UsageLimits {
    pub fn with_group(mut self, group: impl Into<String>, limits: GroupLimits) -> Self {
        self.groups.insert(group.into(), limits);
        self
    }

    pub fn with_exempt_group(mut self, group: impl Into<String>) -> Self {
        self.exempt_groups.insert(group.into());
        self
    }

    fn limits_for(&self, group: &str) -> Option<&GroupLimits> {
        if self.exempt_groups.contains(group) {
            return None;
        }
        self.groups.get(group)
    }
}

/// Rejects the turn when the user's group or the user alone used up their quota.
pub struct CheckUsageMiddleware {
    usage: Arc<dyn UsageStore>,
    limits: UsageLimits,
    localizer: Arc<dyn Localizer>,
}

impl CheckUsageMiddleware {
    pub fn new(usage: Arc<dyn UsageStore>, limits: UsageLimits, localizer: Arc<dyn Localizer>) -> Self {
        Self {
            usage,
            limits,
            localizer,
        }
    }
}

#[async_trait]
impl ChatMiddleware for CheckUsageMiddleware {
    fn order(&self) -> i32 {
        CHECK_USAGE_ORDER
    }

    fn name(&self) -> &str {
        "check_usage"
    }

    async fn invoke(&self, ctx: &mut ChatContext, next: Next<'_>) -> Result<()> {
        let limits = match ctx.user.group.as_deref().and_then(|g| self.limits.limits_for(g)) {
            Some(limits) => limits.clone(),
            None => return next.run(ctx).await,
        };
        let since = now_millis().saturating_sub(self.limits.window_secs.saturating_mul(1000));

        if let (Some(max), Some(group)) = (limits.tokens, ctx.user.group.clone()) {
            let used = self.usage.sum_since(&UsageScope::Group(group.clone()), since).await?;
            if used >= max {
                tracing::info!(group = %group, used, max, "group token quota exceeded");
                return Err(Error::chat(self.localizer.t(i18n::ERROR_TOKEN_LIMIT_GROUP)));
            }
        }

        if let Some(max) = limits.user_tokens {
            let used = self
                .usage
                .sum_since(&UsageScope::User(ctx.user.id.clone()), since)
                .await?;
            if used >= max {
                tracing::info!(user = %ctx.user.id, used, max, "user token quota exceeded");
                return Err(Error::chat(self.localizer.t(i18n::ERROR_TOKEN_LIMIT_USER)));
            }
        }

        next.run(ctx).await
    }
}

/// Records the tokens of a successful turn. Recording failures are logged, never raised.
pub struct StoreUsageMiddleware {
    usage: Arc<dyn UsageStore>,
}

impl StoreUsageMiddleware {
    pub fn new(usage: Arc<dyn UsageStore>) -> Self {
        Self { usage }
    }
}

#[async_trait]
impl ChatMiddleware for StoreUsageMiddleware {
    fn order(&self) -> i32 {
        STORE_USAGE_ORDER
    }

    fn name(&self) -> &str {
        "store_usage"
    }

    async fn invoke(&self, ctx: &mut ChatContext, next: Next<'_>) -> Result<()> {
        next.run(ctx).await?;

        let Some(usage) = ctx.usage.as_ref() else {
            return Ok(());
        };
        let record = UsageRecord {
            user_id: ctx.user.id.clone(),
            user_group: ctx.user.group.clone(),
            llm: usage.llm.clone(),
            model: usage.model.clone(),
            count: usage.token_count,
            at: now_millis(),
        };
        if let Err(err) = self.usage.increment(record).await {
            tracing::error!(
                conversation_id = ctx.conversation_id,
                error = %err,
                "failed to update usage data"
            );
        }
        Ok(())
    }
}
