//! Skip-policy evaluation.
//!
//! Callback conditions see the live context; expression conditions are
//! evaluated against a read-only projection of a snapshot. Any expression
//! error (parse or evaluation) means "do not skip" and is logged, so a
//! malformed condition degrades to running the step rather than silently
//! bypassing it.

use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::definition::{SkipCondition, SkipPolicy};
use crate::expr::{self, ContextProjection};

/// Evaluates a step's skip policy against the context.
pub async fn should_skip(policy: &SkipPolicy, step_id: &str, ctx: &Arc<ExecutionContext>) -> bool {
    match &policy.condition {
        SkipCondition::Callback(predicate) => predicate.should_skip(ctx).await,
        SkipCondition::Expression(source) => {
            let snapshot = ctx.snapshot();
            let projection = ContextProjection::from_snapshot(&snapshot);
            match expr::evaluate(source, &projection) {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(
                        step = %step_id,
                        condition = %source,
                        error = %err,
                        "skip condition failed to evaluate; running the step"
                    );
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::SkipPolicy;
    use serde_json::json;

    #[tokio::test]
    async fn expression_condition_consults_context() {
        let ctx = Arc::new(ExecutionContext::new());
        ctx.set_global("mode", json!("fast"));
        let policy = SkipPolicy::expression("globals.mode == 'fast'");
        assert!(should_skip(&policy, "s", &ctx).await);

        ctx.set_global("mode", json!("full"));
        assert!(!should_skip(&policy, "s", &ctx).await);
    }

    #[tokio::test]
    async fn callback_condition_sees_live_context() {
        let ctx = Arc::new(ExecutionContext::new());
        ctx.set_step_output("probe", json!(7));
        let policy = SkipPolicy::callback(|ctx| {
            ctx.get_step_output("probe")
                .and_then(|v| v.as_i64())
                .is_some_and(|n| n > 5)
        });
        assert!(should_skip(&policy, "s", &ctx).await);
    }

    #[tokio::test]
    async fn broken_expression_means_do_not_skip() {
        let ctx = Arc::new(ExecutionContext::new());
        let policy = SkipPolicy::expression("not ( valid");
        assert!(!should_skip(&policy, "s", &ctx).await);
    }
}
