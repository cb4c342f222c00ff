use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{stream::once, Stream, StreamExt};
use tracing::{info, warn};

use crate::{
    errors::AppError,
    interaction_log::LogRecord,
    models::{new_request_id, GenerateResponse, PromptRequest},
    state::AppState,
};

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => AppError::Internal(format!("metrics render failed: {error}")).into_response(),
    }
}

type PromptBody = Result<Json<PromptRequest>, JsonRejection>;

pub async fn generate(State(state): State<AppState>, request: PromptBody) -> Response {
    let timer = state.metrics.start_request("/generate", false);
    let response = match process_generate(&state, request).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    };
    timer.finish(response.status().as_u16());
    response
}

pub async fn stream(State(state): State<AppState>, request: PromptBody) -> Response {
    let timer = state.metrics.start_request("/stream", true);
    let response = match process_stream(&state, request).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    };
    timer.finish(response.status().as_u16());
    response
}

fn prompt_from(request: PromptBody) -> Result<String, AppError> {
    let Json(request) = request?;
    request.into_prompt().map_err(AppError::BadRequest)
}

async fn process_generate(state: &AppState, request: PromptBody) -> Result<Response, AppError> {
    let prompt = prompt_from(request)?;
    let request_id = new_request_id();

    let result = state.sourcer.generate(&prompt).await;
    if result.is_error() {
        state.metrics.observe_backend_error("generate");
        warn!(request_id = %request_id, backend = %result.backend, "generation failed");
        return Err(AppError::Unavailable(result.text()));
    }

    let text = result.text();
    let record = LogRecord::new(prompt, text.clone(), false, Some(result.backend));
    state
        .interactions
        .append(&record)
        .await
        .map_err(|error| AppError::Internal(error.to_string()))?;

    state.metrics.observe_response(result.backend, false);
    info!(request_id = %request_id, backend = %result.backend, "generate completed");
    Ok(Json(GenerateResponse { response: text }).into_response())
}

async fn process_stream(state: &AppState, request: PromptBody) -> Result<Response, AppError> {
    let prompt = prompt_from(request)?;
    let request_id = new_request_id();

    let (tokens, backend) = state.sourcer.stream(&prompt).await;
    match state.multiplexer.open(prompt, tokens, backend).await {
        Ok(outbound) => {
            state.metrics.observe_response(backend, true);
            info!(request_id = %request_id, backend = %backend, "stream started");
            let frames = outbound.map(|token| sse_frame(&token.to_string()));
            Ok(event_stream(StatusCode::OK, frames))
        }
        Err(failure) => {
            state.metrics.observe_backend_error("stream_start");
            warn!(request_id = %request_id, backend = %backend, error = %failure, "stream refused");
            let frame = sse_frame(&format!("ERROR: {failure}"));
            Ok(event_stream(StatusCode::SERVICE_UNAVAILABLE, once(async move { frame })))
        }
    }
}

fn event_stream<S>(status: StatusCode, frames: S) -> Response
where
    S: Stream<Item = String> + Send + 'static,
{
    let body = Body::from_stream(frames.map(Ok::<_, Infallible>));
    (
        status,
        [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
        body,
    )
        .into_response()
}

fn sse_frame(data: &str) -> String {
    let mut frame = String::with_capacity(data.len() + 8);
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line.strip_suffix('\r').unwrap_or(line));
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_tokens_frame_as_one_event() {
        assert_eq!(sse_frame(" said:"), "data:  said:\n\n");
    }

    #[test]
    fn multi_line_tokens_use_one_field_per_line() {
        assert_eq!(sse_frame("a\r\nb"), "data: a\ndata: b\n\n");
    }
}
