//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Health polling and strictly ordered step execution."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::time::Duration;

use fdo_env_common::config::ProbeConfig;
use fdo_env_common::template::Params;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Url};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{ProbeError, SequenceError, StepError};
use crate::retry::RetryPolicy;
use crate::step::{prepare, Body, Expect, ProbeStep, StepOutput};

/// Runs probes and step sequences over one shared HTTP client.
#[derive(Debug, Clone)]
pub struct Sequencer {
    client: Client,
    request_timeout: Duration,
}

impl Sequencer {
    /// `request_timeout` bounds each individual attempt.
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("fdo-env/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            request_timeout,
        })
    }

    pub fn from_config(config: &ProbeConfig) -> Result<Self, reqwest::Error> {
        Self::new(config.request_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Poll `url` with GET until a 2xx arrives or the budget runs out.
    pub async fn probe(
        &self,
        url: &str,
        timeout: Duration,
        retry: &RetryPolicy,
    ) -> Result<(), ProbeError> {
        let parsed = Url::parse(url).map_err(|err| ProbeError {
            url: url.to_owned(),
            last_status: None,
            attempts: 0,
            last_error: Some(err.to_string()),
        })?;
        let output = self
            .attempt(&Method::GET, parsed, None, &Expect::Success, retry, timeout)
            .await?;
        info!(%url, status = output.0, "probe succeeded");
        Ok(())
    }

    /// Run `steps` in order with no substitution parameters.
    pub async fn run_sequence(&self, steps: &[ProbeStep]) -> Result<Vec<StepOutput>, SequenceError> {
        self.run_sequence_with(steps, &Params::new()).await
    }

    /// Run `steps` in order, expanding `{name}` placeholders from `params`.
    ///
    /// The first failing step aborts the sequence; nothing after it is sent.
    pub async fn run_sequence_with(
        &self,
        steps: &[ProbeStep],
        params: &Params,
    ) -> Result<Vec<StepOutput>, SequenceError> {
        let mut outputs: Vec<StepOutput> = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            let result = self.run_step(step, params, outputs.last()).await;
            match result {
                Ok(output) => {
                    debug!(step = %step.name, index, status = output.status, "step succeeded");
                    outputs.push(output);
                }
                Err(cause) => {
                    warn!(step = %step.name, index, error = %cause, "step failed, aborting sequence");
                    return Err(SequenceError {
                        failed_step_index: index,
                        step_name: step.name.clone(),
                        cause,
                    });
                }
            }
        }
        Ok(outputs)
    }

    async fn run_step(
        &self,
        step: &ProbeStep,
        params: &Params,
        previous: Option<&StepOutput>,
    ) -> Result<StepOutput, StepError> {
        let (url, body) = prepare(step, params, previous)?;
        let parsed = Url::parse(&url).map_err(|err| StepError::InvalidUrl {
            url: url.clone(),
            reason: err.to_string(),
        })?;
        let (status, content_type, bytes) = self
            .attempt(
                &step.method,
                parsed,
                body.as_ref(),
                &step.expect,
                &step.retry,
                self.request_timeout,
            )
            .await?;
        Ok(StepOutput {
            name: step.name.clone(),
            status,
            content_type,
            body: bytes,
        })
    }

    async fn attempt(
        &self,
        method: &Method,
        url: Url,
        body: Option<&Body>,
        expect: &Expect,
        retry: &RetryPolicy,
        timeout: Duration,
    ) -> Result<(u16, Option<String>, Vec<u8>), ProbeError> {
        let mut last_status = None;
        let mut last_error = None;

        for attempt in 1..=retry.attempts() {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .timeout(timeout);
            if let Some(body) = body {
                request = request
                    .header(CONTENT_TYPE, body.content_type.as_str())
                    .body(body.bytes.clone());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let content_type = response
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_owned);
                    last_status = Some(status);
                    match response.bytes().await {
                        Ok(bytes) if expect.matches(status, &bytes) => {
                            return Ok((status, content_type, bytes.to_vec()));
                        }
                        Ok(_) => {
                            last_error = None;
                            debug!(%url, attempt, status, "unexpected response");
                        }
                        Err(err) => {
                            debug!(%url, attempt, status, error = %err, "failed to read body");
                            last_error = Some(err.to_string());
                        }
                    }
                }
                Err(err) => {
                    debug!(%url, attempt, error = %err, "request failed");
                    last_status = None;
                    last_error = Some(err.to_string());
                }
            }

            if attempt < retry.attempts() {
                sleep(retry.delay_after(attempt)).await;
            }
        }

        Err(ProbeError {
            url: url.to_string(),
            last_status,
            attempts: retry.attempts(),
            last_error,
        })
    }
}
