//! AlertAction：检测到紧急情况时调用应急服务

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::actions::{Action, ActionConfig, ActionContext, ActionMetadata, ActionResult};
use crate::core::{AgentError, SharedContext};
use crate::services::EmergencyService;

pub struct AlertAction {
    service: Arc<dyn EmergencyService>,
    initialized: AtomicBool,
}

impl AlertAction {
    pub fn new(service: Arc<dyn EmergencyService>) -> Self {
        Self {
            service,
            initialized: AtomicBool::new(false),
        }
    }

    /// 事件详情：输入优先，否则由最近一次观察构造
    async fn event_details(input: Option<&Value>, shared: &SharedContext) -> Value {
        if let Some(details) = input {
            return details.clone();
        }
        let obs = shared.get_last_observation().await.unwrap_or_default();
        json!({
            "type": "vision_emergency",
            "description": obs.description,
            "confidence": obs.confidence,
            "objects_detected": obs.objects_detected,
        })
    }
}

#[async_trait]
impl Action for AlertAction {
    fn metadata(&self) -> ActionMetadata {
        ActionMetadata::new("alert", "Emergency escalation for handling emergencies")
            .with_dependencies(&["emergency_service"])
            .with_capabilities(&["emergency_call", "alert_service"])
    }

    async fn initialize(&self, _config: &ActionConfig) -> Result<(), AgentError> {
        if self.service.is_mock() {
            tracing::warn!("Alert action running in mock mode");
        }
        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!("Alert action initialized");
        Ok(())
    }

    async fn execute(&self, ctx: ActionContext) -> ActionResult {
        let start = Instant::now();
        if !self.is_initialized() {
            return ActionResult::failure(AgentError::NotInitialized("alert".into())).with_elapsed(start);
        }

        let details = Self::event_details(ctx.input.as_ref(), &ctx.shared).await;
        let emergency_type = details
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        tracing::info!(event = %details, "Calling emergency service");

        let accepted = match self.service.escalate(&details).await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!(error = %e, "Emergency service call failed");
                return ActionResult::failure(AgentError::Execution(e))
                    .with_metadata("emergency_type", emergency_type)
                    .with_elapsed(start);
            }
        };
        ctx.shared.set_last_alert(details.clone()).await;

        let output = json!({
            "service_called": accepted,
            "event_details": details,
        });
        let result = if accepted {
            ActionResult::success(output)
        } else {
            let mut rejected =
                ActionResult::failure(AgentError::Execution("emergency service rejected the event".into()));
            rejected.output = Some(output);
            rejected
        };
        tracing::info!(accepted, elapsed_ms = start.elapsed().as_millis() as u64, "Alert action complete");
        result
            .with_metadata("emergency_type", emergency_type)
            .with_elapsed(start)
    }

    async fn cleanup(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        tracing::info!("Alert action cleaned up");
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}
