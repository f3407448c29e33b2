//! Executes one `PreparedRequest` with reqwest.

use std::error::Error as _;
use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rolling_core::{Method, OptionKey, PreparedRequest, Transfer, TransportErrorKind, TransportMeta};
use tracing::trace;

pub async fn fetch(client: reqwest::Client, request: PreparedRequest) -> Transfer {
    let started = Instant::now();
    let headers = match header_map(&request.headers) {
        Ok(headers) => headers,
        Err(line) => {
            return Transfer::failed(
                TransportErrorKind::Malformed,
                format!("malformed header line: {line:?}"),
                started.elapsed(),
            )
        }
    };

    let method = match request.method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
    };
    let mut builder = client.request(method, request.target.as_str()).headers(headers);
    if let Some(body) = &request.body {
        builder = builder.form(body);
    }
    if let Some(timeout) = request.options.duration(OptionKey::Timeout) {
        builder = builder.timeout(timeout);
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(err) => return Transfer::failed(classify(&err), describe(&err), started.elapsed()),
    };

    let status = response.status();
    let version = response.version();
    let effective_url = response.url().to_string();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut body = Vec::new();
    if request.options.flag(OptionKey::IncludeResponseHeaders) == Some(true) {
        body.extend_from_slice(format!("{version:?} {status}\r\n").as_bytes());
        for (name, value) in response.headers() {
            body.extend_from_slice(name.as_str().as_bytes());
            body.extend_from_slice(b": ");
            body.extend_from_slice(value.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(b"\r\n");
    }

    match response.bytes().await {
        Ok(bytes) => body.extend_from_slice(&bytes),
        Err(err) => return Transfer::failed(classify(&err), describe(&err), started.elapsed()),
    }

    let elapsed = started.elapsed();
    trace!(url = %effective_url, status = status.as_u16(), ?elapsed, "transfer finished");
    let mut meta = TransportMeta::succeeded(status.as_u16(), elapsed)
        .with_extra("effective_url", effective_url)
        .with_extra("size_download", body.len())
        .with_extra("http_version", format!("{version:?}"));
    if let Some(content_type) = content_type {
        meta = meta.with_extra("content_type", content_type);
    }
    Transfer { body, meta }
}

/// Parse `Name: value` lines. Returns the first offending line on failure.
fn header_map(lines: &[String]) -> Result<HeaderMap, String> {
    let mut map = HeaderMap::new();
    for line in lines {
        let (name, value) = line.split_once(':').ok_or_else(|| line.clone())?;
        let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| line.clone())?;
        let value = HeaderValue::from_str(value.trim()).map_err(|_| line.clone())?;
        map.append(name, value);
    }
    Ok(map)
}

fn classify(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_builder() {
        TransportErrorKind::Malformed
    } else if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_redirect() {
        TransportErrorKind::TooManyRedirects
    } else if err.is_connect() {
        let chain = describe(err).to_ascii_lowercase();
        if chain.contains("dns") {
            TransportErrorKind::Resolve
        } else if chain.contains("certificate") || chain.contains("tls") {
            TransportErrorKind::Tls
        } else {
            TransportErrorKind::Connect
        }
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::Receive
    } else {
        TransportErrorKind::Other
    }
}

/// The error and every source below it, joined with `": "`.
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
