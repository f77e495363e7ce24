//! Built-in middleware.
//!
//! | Middleware | Order | Role |
//! |------------|-------|------|
//! | [`UiMiddleware`] | -900 | gives the turn access to client-side confirm / input requests |
//! | [`CheckUsageMiddleware`] | -500 | rejects turns of users or groups over their token quota |
//! | [`HistoryMiddleware`] | -100 | resolves the parent message and loads the conversation thread |
//! | [`StoreUsageMiddleware`] | 0 | records consumed tokens after a successful turn |
//! | [`ChooseLlmMiddleware`] | 480 | falls back to the first available model |
//! | [`DefaultPromptMiddleware`] | 490 | adds a system prompt when none was set |
//! | [`SummarizeHistoryMiddleware`] | 500 | names the conversation while the provider answers |

pub mod choose_llm;
pub mod default_prompt;
pub mod history;
pub mod summarize;
pub mod ui;
pub mod usage;

pub use choose_llm::ChooseLlmMiddleware;
pub use default_prompt::DefaultPromptMiddleware;
pub use history::HistoryMiddleware;
pub use summarize::SummarizeHistoryMiddleware;
pub use ui::UiMiddleware;
pub use usage::{CheckUsageMiddleware, GroupLimits, StoreUsageMiddleware, UsageLimits};

pub const UI_ORDER: i32 = -900;
pub const CHECK_USAGE_ORDER: i32 = -500;
pub const HISTORY_ORDER: i32 = -100;
pub const STORE_USAGE_ORDER: i32 = 0;
pub const CHOOSE_LLM_ORDER: i32 = 480;
pub const DEFAULT_PROMPT_ORDER: i32 = 490;
pub const SUMMARIZE_ORDER: i32 = 500;
