use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::debug;

use crate::{
    backend::{BackendError, Token, TokenStream},
    config::BackendConfig,
};

#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    config: BackendConfig,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateRecord {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
struct ParsedLine {
    token: Option<Token>,
    finished: bool,
}

impl OllamaClient {
    pub fn new(client: reqwest::Client, config: BackendConfig) -> Self {
        Self { client, config }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let payload = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(self.config.url("/api/generate"))
            .timeout(self.config.request_timeout)
            .json(&payload)
            .send()
            .await?;
        let body = response.text().await?;

        parse_first_record(&body)
    }

    /// Opens the streaming request on first poll. Connection failures end the
    /// stream with a single `Token::Error`.
    pub fn stream(&self, prompt: String) -> TokenStream {
        let client = self.client.clone();
        let url = self.config.url("/api/generate");
        let model = self.config.model.clone();
        let read_timeout = self.config.request_timeout;

        let stream = async_stream::stream! {
            let payload = GenerateRequest {
                model: &model,
                prompt: &prompt,
                stream: true,
            };
            let response = match timeout(read_timeout, client.post(&url).json(&payload).send()).await {
                Ok(Ok(response)) => response,
                Ok(Err(error)) => {
                    yield Token::Error(BackendError::from(error).to_string());
                    return;
                }
                Err(_) => {
                    yield Token::Error(
                        BackendError::Timeout(format!("no response within {read_timeout:?}")).to_string(),
                    );
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = timeout(read_timeout, response.text())
                    .await
                    .ok()
                    .and_then(Result::ok)
                    .unwrap_or_else(|| "unknown backend error".to_owned());
                yield Token::Error(map_http_error(status, body).to_string());
                return;
            }

            let mut upstream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut upstream_done = false;

            while !upstream_done {
                match timeout(read_timeout, upstream.next()).await {
                    Ok(Some(Ok(bytes))) => buffer.extend_from_slice(&bytes),
                    Ok(Some(Err(error))) => {
                        yield Token::Error(BackendError::from(error).to_string());
                        return;
                    }
                    Ok(None) => {
                        upstream_done = true;
                        buffer.push(b'\n');
                    }
                    Err(_) => {
                        yield Token::Error(
                            BackendError::Timeout(format!("no data within {read_timeout:?}")).to_string(),
                        );
                        return;
                    }
                }

                for line in drain_lines(&mut buffer) {
                    let parsed = parse_stream_line(&line);
                    if let Some(token) = parsed.token {
                        yield token;
                    }
                    if parsed.finished {
                        return;
                    }
                }
            }
        };

        debug!(model = %self.config.model, "live stream prepared");
        stream.boxed()
    }
}

/// Parses the first newline-delimited record of a non-streamed body; the rest is ignored.
fn parse_first_record(body: &str) -> Result<String, BackendError> {
    let text = body.trim();
    let first_line = text.split_once('\n').map_or(text, |(first, _)| first);

    let record: GenerateRecord = serde_json::from_str(first_line)
        .map_err(|error| BackendError::InvalidResponse(error.to_string()))?;

    match record.response {
        Some(response) => Ok(response),
        None => Err(BackendError::InvalidResponse(
            record
                .error
                .map(|error| format!("upstream error: {error}"))
                .unwrap_or_else(|| "no response".to_owned()),
        )),
    }
}

fn drain_lines(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(index) = buffer.iter().position(|byte| *byte == b'\n') {
        let mut line: Vec<u8> = buffer.drain(..=index).collect();
        line.pop();
        lines.push(line);
    }
    lines
}

fn parse_stream_line(line: &[u8]) -> ParsedLine {
    let skip = ParsedLine {
        token: None,
        finished: false,
    };
    let Ok(line) = std::str::from_utf8(line) else {
        debug!("skipping non-utf8 stream line");
        return skip;
    };
    let line = line.trim();
    if line.is_empty() {
        return skip;
    }

    let record: GenerateRecord = match serde_json::from_str(line) {
        Ok(record) => record,
        Err(error) => {
            debug!(error = %error, "skipping unparseable stream line");
            return skip;
        }
    };

    if let Some(error) = record.error {
        return ParsedLine {
            token: Some(Token::Error(format!("upstream error: {error}"))),
            finished: true,
        };
    }

    ParsedLine {
        token: record
            .response
            .filter(|fragment| !fragment.is_empty())
            .map(Token::Text),
        finished: record.done,
    }
}

fn map_http_error(status: StatusCode, body: String) -> BackendError {
    let trimmed = body.chars().take(400).collect::<String>();
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            BackendError::Unavailable(format!("status {}: {trimmed}", status.as_u16()))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            BackendError::Timeout(format!("upstream timeout: {trimmed}"))
        }
        _ => BackendError::InvalidResponse(format!("status {}: {trimmed}", status.as_u16())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_body_yields_the_answer() {
        let answer = parse_first_record(r#"{"response":"hello","done":true}"#)
            .expect("well-formed record should parse");
        assert_eq!(answer, "hello");
    }

    #[test]
    fn multi_line_body_keeps_only_the_first_record() {
        let body = "{\"response\":\"first\"}\n{\"response\":\"second\"}\n";
        let answer = parse_first_record(body).expect("first record should parse");
        assert_eq!(answer, "first");
    }

    #[test]
    fn missing_answer_field_is_reported() {
        let error = parse_first_record(r#"{"done":true}"#).expect_err("record has no answer");
        assert!(error.to_string().contains("no response"));
    }

    #[test]
    fn upstream_error_field_is_carried_into_the_cause() {
        let error = parse_first_record(r#"{"error":"model 'llama3' not found"}"#)
            .expect_err("error record has no answer");
        assert!(error.to_string().contains("model 'llama3' not found"));
    }

    #[test]
    fn empty_and_malformed_bodies_are_invalid() {
        assert!(matches!(
            parse_first_record(""),
            Err(BackendError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_first_record("not json"),
            Err(BackendError::InvalidResponse(_))
        ));
    }

    #[test]
    fn drain_lines_leaves_partial_tail_in_buffer() {
        let mut buffer = b"{\"a\":1}\n{\"b\":2}\n{\"c\"".to_vec();
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines, vec![b"{\"a\":1}".to_vec(), b"{\"b\":2}".to_vec()]);
        assert_eq!(buffer, b"{\"c\"".to_vec());
    }

    #[test]
    fn stream_lines_are_classified() {
        assert_eq!(
            parse_stream_line(br#"{"response":"Hel","done":false}"#),
            ParsedLine {
                token: Some(Token::Text("Hel".to_owned())),
                finished: false,
            }
        );
        assert_eq!(
            parse_stream_line(br#"{"response":"","done":true}"#),
            ParsedLine {
                token: None,
                finished: true,
            }
        );
        assert_eq!(
            parse_stream_line(b"garbage"),
            ParsedLine {
                token: None,
                finished: false,
            }
        );
        assert_eq!(
            parse_stream_line(b"   "),
            ParsedLine {
                token: None,
                finished: false,
            }
        );
    }

    #[test]
    fn upstream_error_record_ends_the_stream() {
        let parsed = parse_stream_line(br#"{"error":"out of memory"}"#);
        assert!(parsed.finished);
        assert_eq!(
            parsed.token,
            Some(Token::Error("upstream error: out of memory".to_owned()))
        );
    }
}
