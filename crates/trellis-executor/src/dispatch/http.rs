use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use tracing::debug;
use trellis_config::Step;
use url::Url;

use super::{StepExecutor, StepRuntime};
use crate::context::ExecutionContext;
use crate::error::ExecutionError;
use crate::result::StepResult;

/// Sends one HTTP request per step.
///
/// `url`, `headers` and `body` are templates; `method` defaults to `GET`.
/// Exports `status_code` and `response_body`. A non-2xx status fails the step.
pub struct HttpExecutor {
  client: reqwest::Client,
}

impl Default for HttpExecutor {
  fn default() -> Self {
    Self::new()
  }
}

impl HttpExecutor {
  pub fn new() -> Self {
    Self::with_client(reqwest::Client::new())
  }

  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl StepExecutor for HttpExecutor {
  async fn execute(
    &self,
    step: &Step,
    ctx: &ExecutionContext,
    runtime: &StepRuntime,
  ) -> Result<StepResult, ExecutionError> {
    let invalid = |message: String| ExecutionError::InvalidStep {
      step: step.name.clone(),
      message,
    };

    let raw_url = step
      .url
      .as_deref()
      .ok_or_else(|| invalid("http step needs `url`".to_string()))?;
    let rendered = runtime.templates.render(raw_url, ctx)?;
    let url = Url::parse(&rendered).map_err(|e| invalid(format!("invalid url '{rendered}': {e}")))?;

    let method = step.method.as_deref().unwrap_or("GET").to_ascii_uppercase();
    let method =
      Method::from_str(&method).map_err(|e| invalid(format!("invalid method '{method}': {e}")))?;

    let mut request = self.client.request(method.clone(), url.clone());
    for (name, value) in runtime.templates.render_map(&step.headers, ctx)? {
      request = request.header(name, value);
    }
    if let Some(body) = &step.body {
      request = request.body(runtime.templates.render(body, ctx)?);
    }
    if let Some(seconds) = step.timeout {
      request = request.timeout(Duration::from_secs(seconds));
    }

    debug!(run_id = %ctx.run_id, step = %step.name, method = %method, url = %url, "http_request");

    let response = tokio::select! {
      response = request.send() => response.map_err(|e| {
        if e.is_timeout() {
          ExecutionError::Timeout {
            step: step.name.clone(),
            seconds: step.timeout.unwrap_or_default(),
          }
        } else {
          ExecutionError::Http(e)
        }
      })?,
      _ = runtime.cancel.cancelled() => return Err(ExecutionError::Cancelled),
    };

    let status = response.status();
    let body = tokio::select! {
      body = response.text() => body?,
      _ = runtime.cancel.cancelled() => return Err(ExecutionError::Cancelled),
    };

    if !status.is_success() {
      return Err(ExecutionError::StepExecution {
        step: step.name.clone(),
        message: format!("{method} {url} returned {status}"),
      });
    }

    let output = serde_json::from_str::<Value>(&body).unwrap_or_else(|_| json!(body));

    Ok(
      StepResult::success(step, output)
        .with_export("status_code", status.as_u16())
        .with_export("response_body", body),
    )
  }
}
