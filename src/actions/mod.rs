//! Action 插槽：契约、注册表与内置能力（watch / speak / alert）

pub mod alert;
pub mod base;
pub mod registry;
pub mod speak;
pub mod watch;

use std::sync::Arc;

pub use alert::AlertAction;
pub use base::{Action, ActionConfig, ActionContext, ActionMetadata, ActionResult};
pub use registry::ActionRegistry;
pub use speak::SpeakAction;
pub use watch::WatchAction;

use crate::config::InferenceSection;
use crate::core::AgentError;
use crate::services::{InferenceClient, OpenAiCompatClient};

/// 注册配置里带 api_key 时为该 Action 单独建客户端（base_url 同样可覆盖），否则沿用默认客户端
pub(crate) fn resolve_inference_client(
    action: &str,
    default: &Arc<dyn InferenceClient>,
    remote: &InferenceSection,
    config: &ActionConfig,
) -> Result<Arc<dyn InferenceClient>, AgentError> {
    let Some(api_key) = base::config_string(action, config, "api_key")?.filter(|k| !k.is_empty()) else {
        return Ok(Arc::clone(default));
    };
    let base_url = base::config_string(action, config, "base_url")?.or_else(|| remote.base_url.clone());
    let client = OpenAiCompatClient::new(
        base_url.as_deref(),
        &api_key,
        remote.request_timeout_secs,
        remote.max_retries,
    )
    .map_err(|e| AgentError::initialization(action, e))?;
    Ok(Arc::new(client))
}
