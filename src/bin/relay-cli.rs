use std::{
    io::{self, Write},
    process::ExitCode,
    time::Duration,
};

use clap::Parser;
use futures_util::StreamExt;
use prompt_relay::models::GenerateResponse;
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Send a prompt to the local relay.
#[derive(Debug, Parser)]
#[command(name = "relay-cli", version)]
struct Args {
    /// Prompt to send
    prompt: String,
    /// Stream response token-by-token
    #[arg(long)]
    stream: bool,
    /// Base URL of the relay
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    url: String,
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(args.timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(error) => {
            println!("[Error contacting API: {error}]");
            return ExitCode::FAILURE;
        }
    };
    let base = args.url.trim_end_matches('/');

    if args.stream {
        stream_prompt(&client, base, &args.prompt).await
    } else {
        println!("[Waiting for response...]");
        match generate(&client, base, &args.prompt).await {
            Ok(text) => println!("{text}"),
            Err(error) => println!("[Error contacting API: {error}]"),
        }
        ExitCode::SUCCESS
    }
}

async fn generate(client: &reqwest::Client, base: &str, prompt: &str) -> Result<String, reqwest::Error> {
    let response = client
        .post(format!("{base}/generate"))
        .json(&json!({ "prompt": prompt }))
        .send()
        .await?
        .error_for_status()?;
    let body: serde_json::Value = response.json().await?;
    Ok(serde_json::from_value::<GenerateResponse>(body)
        .map(|payload| payload.response)
        .unwrap_or_else(|_| "[No response]".to_owned()))
}

async fn stream_prompt(client: &reqwest::Client, base: &str, prompt: &str) -> ExitCode {
    let response = match client
        .post(format!("{base}/stream"))
        .json(&json!({ "prompt": prompt }))
        .send()
        .await
    {
        Ok(response) => response,
        Err(error) => {
            println!("[Error streaming from API: {error}]");
            return ExitCode::SUCCESS;
        }
    };

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        println!(
            "[Error: {} {}]",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        );
        return ExitCode::FAILURE;
    }

    println!("[Streaming response]");
    let mut body = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut stdout = io::stdout();

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(error) => {
                println!("[Error streaming from API: {error}]");
                return ExitCode::SUCCESS;
            }
        };
        buffer.extend_from_slice(&bytes);

        if let Err(error) = echo_events(&mut buffer, &mut stdout) {
            println!("[Error streaming from API: {error}]");
            return ExitCode::SUCCESS;
        }
    }
    println!();
    ExitCode::SUCCESS
}

// Writes the data of every complete line in `buffer`; a partial trailing line stays buffered.
fn echo_events(buffer: &mut Vec<u8>, out: &mut impl Write) -> io::Result<()> {
    while let Some(index) = buffer.iter().position(|byte| *byte == b'\n') {
        let line: Vec<u8> = buffer.drain(..=index).collect();
        let line = String::from_utf8_lossy(&line);
        if let Some(token) = line.strip_prefix("data:") {
            write!(out, "{} ", token.trim())?;
            out.flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdout closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn complete_events_are_echoed_and_partial_lines_kept() {
        let mut buffer = b"data: You said:\n\ndata:  hi\n\ndata: the".to_vec();
        let mut out = Vec::new();

        echo_events(&mut buffer, &mut out).expect("in-memory writes succeed");

        assert_eq!(String::from_utf8(out).expect("utf-8 output"), "You said: hi ");
        assert_eq!(buffer, b"data: the");
    }

    #[test]
    fn write_failures_are_reported() {
        let mut buffer = b"data: hi\n\n".to_vec();

        let error = echo_events(&mut buffer, &mut ClosedPipe).expect_err("write should fail");

        assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
    }
}
