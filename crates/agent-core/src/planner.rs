//! Task Planner
//!
//! Optional pre-step that asks the model to break a goal into numbered steps.
//! The plan is injected into every THINK prompt; when a tool fails the plan is
//! refined with the failure as feedback. Planning calls go through the same
//! rate-limited client as THINK requests but do not consume loop steps.

use std::sync::Arc;

use serde::Serialize;

use crate::client::RateLimitedClient;
use crate::error::Result;

const PLANNER_SYSTEM_PROMPT: &str =
    "You are a task planning expert, skilled at breaking down complex goals into executable steps.";

const REFINER_SYSTEM_PROMPT: &str =
    "You are a task planning expert, skilled at optimizing execution plans.";

/// Ordered steps toward a goal
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub goal: String,
    pub steps: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Numbered list, one step per line
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {step}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Steps from a model reply, numbering and bullets stripped
pub fn parse_plan(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let unnumbered = line.trim_start_matches(|c: char| c.is_ascii_digit());
            let stripped = if unnumbered.len() < line.len() {
                unnumbered.trim_start_matches(['.', ')', ':'])
            } else {
                line.trim_start_matches(['-', '*', '•'])
            };
            stripped.trim().to_string()
        })
        .filter(|step| !step.is_empty())
        .collect()
}

/// Builds and refines plans through the model client
pub struct Planner {
    client: Arc<RateLimitedClient>,
}

impl Planner {
    pub fn new(client: Arc<RateLimitedClient>) -> Self {
        Self { client }
    }

    /// Break `goal` into steps; `context` is any recalled background
    pub async fn create_plan(&self, goal: &str, context: &str) -> Result<Plan> {
        let context = if context.trim().is_empty() { "None" } else { context };
        let prompt = format!(
            "Goal: {goal}\n\
             Context: {context}\n\n\
             Break this goal down into specific executable steps. Each step should be clear and actionable.\n\
             Return them as a numbered list:\n\
             1. Step 1\n\
             2. Step 2"
        );

        let reply = self.client.complete_prompt(PLANNER_SYSTEM_PROMPT, &prompt).await?;
        let plan = Plan {
            goal: goal.to_string(),
            steps: parse_plan(&reply),
        };
        tracing::debug!(steps = plan.steps.len(), "Created plan");
        Ok(plan)
    }

    /// Revise `plan` in light of `feedback`; an empty reply keeps the old plan
    pub async fn refine_plan(&self, plan: &Plan, feedback: &str) -> Result<Plan> {
        let prompt = format!(
            "Current Plan:\n{current}\n\n\
             Feedback:\n{feedback}\n\n\
             Optimize the plan based on the feedback. Return the modified steps as a numbered list.",
            current = plan.render(),
        );

        let reply = self.client.complete_prompt(REFINER_SYSTEM_PROMPT, &prompt).await?;
        let steps = parse_plan(&reply);
        if steps.is_empty() {
            tracing::debug!("Refinement returned no steps, keeping plan");
            return Ok(plan.clone());
        }

        tracing::debug!(steps = steps.len(), "Refined plan");
        Ok(Plan {
            goal: plan.goal.clone(),
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::RetryPolicy;
    use crate::provider::GenerationOptions;
    use crate::testing::ScriptedProvider;

    fn planner(provider: Arc<ScriptedProvider>) -> Planner {
        Planner::new(Arc::new(
            RateLimitedClient::new(provider, GenerationOptions::default())
                .with_min_interval(Duration::ZERO)
                .with_retry(RetryPolicy::no_retry()),
        ))
    }

    #[test]
    fn test_parse_plan_strips_numbering() {
        let steps = parse_plan("1. Look up the price\n\n2) Multiply by 3\n- Report the total\n10: Done");
        assert_eq!(steps, vec!["Look up the price", "Multiply by 3", "Report the total", "Done"]);
        assert!(parse_plan("  \n\n").is_empty());
    }

    #[test]
    fn test_render_numbers_steps() {
        let plan = Plan {
            goal: "g".into(),
            steps: vec!["first".into(), "second".into()],
        };
        assert_eq!(plan.render(), "1. first\n2. second");
    }

    #[tokio::test]
    async fn test_create_then_refine() {
        let provider = Arc::new(ScriptedProvider::replies([
            "1. Compute 123*456\n2. Answer",
            "1. Use the calculator on 123*456\n2. Answer",
        ]));
        let planner = planner(provider.clone());

        let plan = planner.create_plan("Calculate 123*456", "").await.unwrap();
        assert_eq!(plan.steps, vec!["Compute 123*456", "Answer"]);
        assert!(provider.prompts()[0].contains("Goal: Calculate 123*456"));

        let refined = planner.refine_plan(&plan, "calc failed").await.unwrap();
        assert_eq!(refined.steps[0], "Use the calculator on 123*456");
        assert_eq!(refined.goal, "Calculate 123*456");
        assert!(provider.prompts()[1].contains("Feedback:\ncalc failed"));
    }

    #[tokio::test]
    async fn test_empty_refinement_keeps_plan() {
        let provider = Arc::new(ScriptedProvider::replies(["1. Only step", "   "]));
        let planner = planner(provider);

        let plan = planner.create_plan("goal", "").await.unwrap();
        assert_eq!(planner.refine_plan(&plan, "feedback").await.unwrap(), plan);
    }
}
