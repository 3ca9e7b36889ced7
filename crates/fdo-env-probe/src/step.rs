//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "HTTP step descriptions, payloads and success predicates."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::borrow::Cow;

use fdo_env_common::template::{placeholders, render, Params};
use reqwest::Method;
use serde_json::Value;

use crate::error::StepError;
use crate::retry::RetryPolicy;

/// Request body of a step. `Json` string leaves and `Text` are templated.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Json(Value),
    Text(String),
    /// Body of the preceding step's response, forwarded unchanged.
    PreviousResponse,
}

/// Success predicate evaluated against each response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expect {
    /// Any 2xx status.
    Success,
    Status(u16),
    /// 2xx and the body contains the given text.
    SuccessWithBody(String),
}

impl Expect {
    pub fn matches(&self, status: u16, body: &[u8]) -> bool {
        let success = (200..300).contains(&status);
        match self {
            Expect::Success => success,
            Expect::Status(expected) => status == *expected,
            Expect::SuccessWithBody(needle) => {
                success && String::from_utf8_lossy(body).contains(needle.as_str())
            }
        }
    }
}

/// One request in a sequence. `url` may contain `{name}` placeholders.
#[derive(Debug, Clone)]
pub struct ProbeStep {
    pub name: String,
    pub method: Method,
    pub url: String,
    pub payload: Payload,
    pub expect: Expect,
    pub retry: RetryPolicy,
}

impl ProbeStep {
    pub fn new(name: impl Into<String>, method: Method, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method,
            url: url.into(),
            payload: Payload::Empty,
            expect: Expect::Success,
            retry: RetryPolicy::once(),
        }
    }

    pub fn get(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, Method::GET, url)
    }

    pub fn post(name: impl Into<String>, url: impl Into<String>, payload: Payload) -> Self {
        Self::new(name, Method::POST, url).with_payload(payload)
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_expect(mut self, expect: Expect) -> Self {
        self.expect = expect;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Response recorded for a successful step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    pub name: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl StepOutput {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Body parsed as JSON.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Encoded request body with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Body {
    pub(crate) content_type: String,
    pub(crate) bytes: Vec<u8>,
}

/// Expand a step's templates. Fails before any request is sent.
pub(crate) fn prepare(
    step: &ProbeStep,
    params: &Params,
    previous: Option<&StepOutput>,
) -> Result<(String, Option<Body>), StepError> {
    let url = render_url(&step.url, params)?;
    let body = match &step.payload {
        Payload::Empty => None,
        Payload::Json(value) => Some(Body {
            content_type: "application/json".to_owned(),
            bytes: serde_json::to_vec(&render_json(value, params)?)?,
        }),
        Payload::Text(text) => Some(Body {
            content_type: "text/plain; charset=utf-8".to_owned(),
            bytes: render(text, params)?.into_bytes(),
        }),
        Payload::PreviousResponse => {
            let previous = previous.ok_or(StepError::NoPreviousResponse)?;
            Some(Body {
                content_type: previous
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_owned()),
                bytes: previous.body.clone(),
            })
        }
    };
    Ok((url, body))
}

/// Render `template` with every referenced value percent-encoded as a single
/// path segment. Values that would form a dot segment are refused.
fn render_url(template: &str, params: &Params) -> Result<String, StepError> {
    let mut encoded = Params::new();
    for name in placeholders(template) {
        let Some(value) = params.get(name) else {
            return Err(StepError::UnknownParameter(name.to_owned()));
        };
        if matches!(value.as_str(), "." | "..") {
            return Err(StepError::InvalidUrl {
                url: template.to_owned(),
                reason: format!("parameter `{name}` is a dot segment"),
            });
        }
        encoded.insert(name.to_owned(), urlencoding::encode(value).into_owned());
    }
    Ok(render(template, &encoded)?)
}

fn render_json(value: &Value, params: &Params) -> Result<Value, StepError> {
    Ok(match value {
        Value::String(text) => Value::String(render(text, params)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_json(item, params))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| Ok((key.clone(), render_json(item, params)?)))
                .collect::<Result<_, StepError>>()?,
        ),
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> Params {
        Params::from([("guid".to_owned(), "a1b2".to_owned())])
    }

    #[test]
    fn predicates() {
        assert!(Expect::Success.matches(204, b""));
        assert!(!Expect::Success.matches(302, b""));
        assert!(Expect::Status(404).matches(404, b""));
        assert!(Expect::SuccessWithBody("ok".into()).matches(200, b"{\"status\":\"ok\"}"));
        assert!(!Expect::SuccessWithBody("ok".into()).matches(500, b"ok"));
    }

    #[test]
    fn json_string_leaves_are_templated() {
        let step = ProbeStep::post(
            "publish",
            "http://h/devices/{guid}",
            Payload::Json(json!([{ "guid": "{guid}", "port": 8041, "raw": "{not json}" }])),
        );
        let (url, body) = prepare(&step, &params(), None).unwrap();
        assert_eq!(url, "http://h/devices/a1b2");
        let body = body.unwrap();
        assert_eq!(body.content_type, "application/json");
        let sent: Value = serde_json::from_slice(&body.bytes).unwrap();
        assert_eq!(sent, json!([{ "guid": "a1b2", "port": 8041, "raw": "{not json}" }]));
    }

    #[test]
    fn url_parameters_stay_inside_their_segment() {
        let step = ProbeStep::get("fetch", "http://h/api/v1/vouchers/{guid}");
        let hostile = Params::from([("guid".to_owned(), "x/../../rvinfo?a=b#c".to_owned())]);
        let (url, _) = prepare(&step, &hostile, None).unwrap();
        assert_eq!(url, "http://h/api/v1/vouchers/x%2F..%2F..%2Frvinfo%3Fa%3Db%23c");

        let dots = Params::from([("guid".to_owned(), "..".to_owned())]);
        let err = prepare(&step, &dots, None).unwrap_err();
        assert!(matches!(err, StepError::InvalidUrl { .. }));
    }

    #[test]
    fn unknown_parameter_fails_preparation() {
        let step = ProbeStep::get("fetch", "http://h/{device}");
        let err = prepare(&step, &params(), None).unwrap_err();
        assert!(matches!(err, StepError::UnknownParameter(ref name) if name == "device"));
    }

    #[test]
    fn previous_response_is_forwarded_verbatim() {
        let previous = StepOutput {
            name: "get".into(),
            status: 200,
            content_type: Some("application/x-pem-file".into()),
            body: vec![0, 159, 146, 150],
        };
        let step = ProbeStep::post("put", "http://h/", Payload::PreviousResponse);
        let (_, body) = prepare(&step, &Params::new(), Some(&previous)).unwrap();
        let body = body.unwrap();
        assert_eq!(body.bytes, previous.body);
        assert_eq!(body.content_type, "application/x-pem-file");

        let err = prepare(&step, &Params::new(), None).unwrap_err();
        assert!(matches!(err, StepError::NoPreviousResponse));
    }
}
