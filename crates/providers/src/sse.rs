use bytes::BytesMut;
use futures::{Stream, StreamExt};
use reply_core::ChatError;
use std::time::Instant;
use tokio::time::Duration;

use crate::http::map_reqwest_err;

/// Splits a response body into SSE `data` payloads. Fails with a timeout
/// when the body stays silent for longer than `idle`.
pub fn data_events(
    resp: reqwest::Response,
    idle: Duration,
) -> impl Stream<Item = Result<String, ChatError>> + Send {
    let mut stream = Box::pin(resp.bytes_stream());
    async_stream::stream! {
        let mut buf = BytesMut::new();
        let mut last = Instant::now();
        'outer: loop {
            tokio::select! {
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(b)) => {
                            buf.extend_from_slice(&b);
                            last = Instant::now();
                            while let Some((pos, sep)) = find_event_boundary(&buf) {
                                let ev = buf.split_to(pos).freeze();
                                let _ = buf.split_to(sep);
                                match parse_data(&ev) {
                                    Ok(Some(data)) => { yield Ok(data); }
                                    Ok(None) => {}
                                    Err(e) => { yield Err(e); break 'outer; }
                                }
                            }
                        }
                        Some(Err(e)) => { yield Err(map_reqwest_err(e)); break 'outer; }
                        None => {
                            // Last event may end without the blank line.
                            if !buf.is_empty() {
                                match parse_data(&buf.split()) {
                                    Ok(Some(data)) => { yield Ok(data); }
                                    Ok(None) => {}
                                    Err(e) => { yield Err(e); }
                                }
                            }
                            break 'outer;
                        }
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(500)) => {
                    if last.elapsed() > idle { yield Err(ChatError::Timeout("idle".into())); break 'outer; }
                }
            }
        }
    }
}

/// Position of the first blank line and the length of its separator.
fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = twoway::find_bytes(buf, b"\r\n\r\n").map(|p| (p, 4));
    let lf = twoway::find_bytes(buf, b"\n\n").map(|p| (p, 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_data(ev: &[u8]) -> Result<Option<String>, ChatError> {
    let s = std::str::from_utf8(ev).map_err(|e| ChatError::Decode(e.to_string()))?;
    let data_lines: Vec<&str> = s
        .lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    if data_lines.is_empty() {
        return Ok(None);
    }
    if data_lines.len() == 1 && data_lines[0] == "[DONE]" {
        return Ok(None);
    }
    Ok(Some(data_lines.join("\n")))
}
