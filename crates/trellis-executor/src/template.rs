//! Template rendering and condition evaluation using minijinja.
//!
//! Every string field of a step (commands, urls, headers, exports, action
//! messages) is a template rendered against the run's
//! [`ExecutionContext`]: variables overlaid by exports, plus `run_id`.
//!
//! ```yaml
//! command: "nmap -p {{ ports }} {{ target }}"
//! pre_condition: "ports != ''"
//! ```
//!
//! Conditions are minijinja expressions. A condition wrapped in `{{ }}` is
//! accepted too, and string results such as `"false"` or `"0"` (common for
//! values coming from the command line) count as false.

use std::collections::HashMap;

use minijinja::{Environment, Value};

use crate::context::{ExecutionContext, Params};
use crate::error::ExecutionError;

pub struct TemplateEngine {
  env: Environment<'static>,
}

impl Default for TemplateEngine {
  fn default() -> Self {
    Self::new()
  }
}

impl TemplateEngine {
  pub fn new() -> Self {
    Self {
      env: Environment::new(),
    }
  }

  /// Render a template against a context.
  pub fn render(&self, template: &str, ctx: &ExecutionContext) -> Result<String, ExecutionError> {
    self.render_value(template, &ctx.template_context())
  }

  /// Render a template against a context with `extra` values layered on top.
  pub fn render_with(
    &self,
    template: &str,
    ctx: &ExecutionContext,
    extra: &Params,
  ) -> Result<String, ExecutionError> {
    self.render_value(template, &ctx.template_context_with(extra))
  }

  /// Render a template against an arbitrary JSON value.
  pub fn render_value(
    &self,
    template: &str,
    context: &serde_json::Value,
  ) -> Result<String, ExecutionError> {
    if !is_template(template) {
      return Ok(template.to_string());
    }

    self
      .env
      .render_str(template, Value::from_serialize(context))
      .map_err(|e| template_error(template, e))
  }

  /// Render every value of a map.
  pub fn render_map(
    &self,
    templates: &HashMap<String, String>,
    ctx: &ExecutionContext,
  ) -> Result<HashMap<String, String>, ExecutionError> {
    let context = ctx.template_context();
    templates
      .iter()
      .map(|(key, template)| Ok((key.clone(), self.render_value(template, &context)?)))
      .collect()
  }

  /// Evaluate a condition expression.
  pub fn evaluate_condition(
    &self,
    condition: &str,
    ctx: &ExecutionContext,
  ) -> Result<bool, ExecutionError> {
    let trimmed = condition.trim();
    let expr = trimmed
      .strip_prefix("{{")
      .and_then(|s| s.strip_suffix("}}"))
      .map(str::trim)
      .unwrap_or(trimmed);

    if expr.is_empty() {
      return Ok(true);
    }

    let compiled = self
      .env
      .compile_expression(expr)
      .map_err(|e| template_error(condition, e))?;
    let value = compiled
      .eval(Value::from_serialize(ctx.template_context()))
      .map_err(|e| template_error(condition, e))?;

    Ok(is_truthy(&value))
  }
}

fn is_template(s: &str) -> bool {
  s.contains("{{") || s.contains("{%")
}

fn is_truthy(value: &Value) -> bool {
  match value.as_str() {
    Some(s) => !matches!(
      s.trim().to_ascii_lowercase().as_str(),
      "" | "false" | "0" | "no"
    ),
    None => value.is_true(),
  }
}

fn template_error(template: &str, e: minijinja::Error) -> ExecutionError {
  ExecutionError::Template {
    template: template.to_string(),
    message: e.to_string(),
  }
}
