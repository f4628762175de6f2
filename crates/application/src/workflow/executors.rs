//! Node executors
//!
//! One executor per node type, dispatching on the typed config. Each
//! returns the rendered request (persisted as the step's input) together
//! with the node output. DELAY is not handled here; the engine realizes
//! suspension by re-enqueuing.

use std::collections::BTreeMap;
use std::sync::Arc;

use atelier_core::context::StepContext;
use atelier_core::expr;
use atelier_core::template::{interpolate_string, interpolate_value};
use atelier_core::workflow::{
    AiCompletionConfig, ConditionConfig, HttpRequestConfig, Node, NodeKind, TransformConfig,
    WebhookConfig,
};
use atelier_core::{DomainError, Result};
use atelier_ports::{Completion, CompletionRequest, FetchRequest, HttpFetch};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

/// The rendered request and the node output of a successful execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutcome {
    pub input: Value,
    pub output: Value,
}

pub struct NodeExecutor {
    completion: Arc<dyn Completion>,
    fetcher: Arc<dyn HttpFetch>,
}

impl NodeExecutor {
    pub fn new(completion: Arc<dyn Completion>, fetcher: Arc<dyn HttpFetch>) -> Self {
        Self { completion, fetcher }
    }

    pub async fn execute(&self, node: &Node, ctx: &StepContext) -> Result<ExecOutcome> {
        match &node.kind {
            NodeKind::AiCompletion(config) => self.run_completion(config, ctx).await,
            NodeKind::HttpRequest(config) => self.run_http_request(config, ctx).await,
            NodeKind::Condition(config) => Ok(run_condition(&node.id, config, ctx)),
            NodeKind::Transform(config) => Ok(run_transform(config, ctx)),
            NodeKind::Webhook(config) => self.run_webhook(config, ctx).await,
            NodeKind::Delay(_) => Err(DomainError::Infrastructure(
                "delay nodes are suspended by the engine, not executed".to_string(),
            )),
        }
    }

    async fn run_completion(
        &self,
        config: &AiCompletionConfig,
        ctx: &StepContext,
    ) -> Result<ExecOutcome> {
        let now = Utc::now();
        let user_prompt = interpolate_string(&config.user_prompt_template, ctx, now);
        if user_prompt.trim().is_empty() {
            return Err(DomainError::validation(
                "completion prompt rendered empty",
            ));
        }
        let system_prompt = config
            .system_prompt
            .as_ref()
            .map(|s| interpolate_string(s, ctx, now));

        let input = json!({
            "model": config.model,
            "systemPrompt": system_prompt,
            "userPrompt": user_prompt,
        });

        let response = self
            .completion
            .complete(CompletionRequest {
                system_prompt,
                user_prompt,
                model: config.model.clone(),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            })
            .await?;

        Ok(ExecOutcome {
            input,
            output: json!({
                "content": response.content,
                "model": response.model,
                "tokensUsed": response.tokens_used,
            }),
        })
    }

    async fn run_http_request(
        &self,
        config: &HttpRequestConfig,
        ctx: &StepContext,
    ) -> Result<ExecOutcome> {
        let now = Utc::now();
        let url = interpolate_string(&config.url, ctx, now);
        if url.trim().is_empty() {
            return Err(DomainError::validation("request url rendered empty"));
        }

        let headers: BTreeMap<String, String> = config
            .headers
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| (name, interpolate_string(&value, ctx, now)))
            .collect();
        let body = config.body.as_ref().map(|b| interpolate_value(b, ctx, now));

        let input = json!({
            "method": config.method,
            "url": url,
            "body": body,
        });

        // Non-2xx is not an error: the status flows to the output and a
        // downstream CONDITION can branch on it.
        let response = self
            .fetcher
            .fetch(FetchRequest {
                method: config.method.clone(),
                url,
                headers,
                body,
            })
            .await?;

        Ok(ExecOutcome {
            input,
            output: json!({
                "statusCode": response.status,
                "headers": response.headers,
                "body": response.body,
            }),
        })
    }

    async fn run_webhook(&self, config: &WebhookConfig, ctx: &StepContext) -> Result<ExecOutcome> {
        let now = Utc::now();
        let url = interpolate_string(&config.webhook_url, ctx, now);
        if url.trim().is_empty() {
            return Err(DomainError::validation("webhook url rendered empty"));
        }

        let body = json!({ "triggeredAt": now.to_rfc3339(), "input": ctx.input });
        let input = json!({ "webhookUrl": url });

        let response = self.fetcher.fetch(FetchRequest::post(url, body)).await?;

        Ok(ExecOutcome {
            input,
            output: json!({
                "statusCode": response.status,
                "acknowledged": response.is_success(),
            }),
        })
    }
}

fn run_condition(node_id: &str, config: &ConditionConfig, ctx: &StepContext) -> ExecOutcome {
    // A failed evaluation yields false, logged, never an error.
    let result = match expr::eval_bool(&config.expression, ctx) {
        Ok(result) => result,
        Err(e) => {
            warn!(node = node_id, error = %e, "condition evaluation failed, taking false branch");
            false
        }
    };
    let selected = if result {
        config.true_branch.clone()
    } else {
        config.false_branch.clone()
    };

    ExecOutcome {
        input: json!({ "expression": config.expression }),
        output: json!({
            "conditionResult": result,
            "selectedBranch": selected,
        }),
    }
}

fn run_transform(config: &TransformConfig, ctx: &StepContext) -> ExecOutcome {
    let template = Value::Object(config.template.clone());
    let output = interpolate_value(&template, ctx, Utc::now());
    ExecOutcome {
        input: template,
        output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::run::StepStatus;

    fn ctx() -> StepContext {
        let mut ctx = StepContext::new(json!({"value": 20, "name": "ada"}));
        ctx.record_step("fetch", json!({"statusCode": 503}), StepStatus::Completed);
        ctx
    }

    #[test]
    fn condition_selects_true_branch() {
        let outcome = run_condition(
            "check",
            &ConditionConfig {
                expression: "input.value > 10".to_string(),
                true_branch: Some("hi".to_string()),
                false_branch: Some("lo".to_string()),
            },
            &ctx(),
        );
        assert_eq!(outcome.output["conditionResult"], json!(true));
        assert_eq!(outcome.output["selectedBranch"], json!("hi"));
    }

    #[test]
    fn condition_failure_takes_false_branch() {
        let outcome = run_condition(
            "check",
            &ConditionConfig {
                expression: "input.missing.deep > 10".to_string(),
                true_branch: Some("hi".to_string()),
                false_branch: Some("lo".to_string()),
            },
            &ctx(),
        );
        assert_eq!(outcome.output["conditionResult"], json!(false));
        assert_eq!(outcome.output["selectedBranch"], json!("lo"));
    }

    #[test]
    fn condition_branches_on_upstream_status() {
        let outcome = run_condition(
            "check",
            &ConditionConfig {
                expression: "steps.fetch.output.statusCode >= 500".to_string(),
                true_branch: Some("alert".to_string()),
                false_branch: None,
            },
            &ctx(),
        );
        assert_eq!(outcome.output["selectedBranch"], json!("alert"));
    }

    #[test]
    fn transform_interpolates_string_leaves() {
        let mut template = serde_json::Map::new();
        template.insert("greeting".to_string(), json!("hello {{input.name}}"));
        template.insert("keep".to_string(), json!(7));
        let outcome = run_transform(&TransformConfig { template }, &ctx());
        assert_eq!(outcome.output["greeting"], json!("hello ada"));
        assert_eq!(outcome.output["keep"], json!(7));
    }
}
