//! Executes a validated [`TaskScript`] against a [`TaskContext`].

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use minijinja::Environment;

use super::script::{Step, TaskScript, template_env};
use super::{TaskContext, TaskUnit};

/// A compiled task unit backed by a task script.
#[derive(Debug)]
pub struct ScriptTask {
    script: TaskScript,
    env: Environment<'static>,
}

impl ScriptTask {
    /// Wrap an already validated script.
    pub fn new(script: TaskScript) -> Self {
        Self {
            script,
            env: template_env(),
        }
    }

    pub fn script(&self) -> &TaskScript {
        &self.script
    }

    fn render(&self, source: &str, vars: &BTreeMap<String, String>) -> Result<String> {
        Ok(self.env.render_str(source, vars)?)
    }
}

#[async_trait]
impl TaskUnit for ScriptTask {
    fn name(&self) -> &str {
        &self.script.task.name
    }

    fn description(&self) -> &str {
        &self.script.task.description
    }

    async fn run(&self, ctx: &dyn TaskContext) -> Result<()> {
        let mut vars: BTreeMap<String, String> = BTreeMap::new();

        for (idx, step) in self.script.steps.iter().enumerate() {
            let step_no = idx + 1;
            tracing::debug!(task = %self.script.task.name, step = step_no, kind = step.kind(), "running step");

            match step {
                Step::Input { prompt, var } => {
                    let prompt = self
                        .render(prompt, &vars)
                        .with_context(|| format!("step {step_no}: failed to render prompt"))?;
                    ctx.report_status(None);
                    let answer = ctx.request_user_input(&prompt).await?;
                    vars.insert(var.clone(), answer);
                }
                Step::Agent {
                    label,
                    instruction,
                    var,
                    allow_failure,
                } => {
                    let text = self
                        .render(instruction, &vars)
                        .with_context(|| format!("step {step_no}: failed to render instruction"))?;
                    let label = match label {
                        Some(label) => Some(
                            self.render(label, &vars)
                                .with_context(|| format!("step {step_no}: failed to render label"))?,
                        ),
                        None => None,
                    };
                    let outcome = ctx
                        .request_agent_action(&text, label.as_deref())
                        .await
                        .with_context(|| format!("step {step_no}: agent request failed"))?;
                    if !outcome.success {
                        if !*allow_failure {
                            bail!(
                                "step {step_no}: the agent could not complete the instruction: {}",
                                outcome.output
                            );
                        }
                        tracing::info!(step = step_no, "agent reported failure, continuing");
                    }
                    if let Some(var) = var {
                        vars.insert(var.clone(), outcome.output);
                    }
                }
                Step::Choose {
                    prompt,
                    options,
                    var,
                } => {
                    let prompt = self
                        .render(prompt, &vars)
                        .with_context(|| format!("step {step_no}: failed to render prompt"))?;
                    ctx.report_status(None);
                    let choice = ctx.choose(&prompt, options).await?;
                    vars.insert(var.clone(), choice);
                }
                Step::Status { message } => match message {
                    Some(message) => {
                        let message = self
                            .render(message, &vars)
                            .with_context(|| format!("step {step_no}: failed to render status"))?;
                        ctx.report_status(Some(&message));
                    }
                    None => ctx.report_status(None),
                },
                Step::Print { message } => {
                    let message = self
                        .render(message, &vars)
                        .with_context(|| format!("step {step_no}: failed to render message"))?;
                    ctx.emit(&message);
                }
            }
        }

        ctx.report_status(None);
        Ok(())
    }
}
