//! Line-delimited message source.
//!
//! Stands in for the message-queue consumer. Each line is
//! `<topic>\t<json payload>`; blank lines and lines starting with `#` are
//! skipped. Partition is always 0 and the offset is the 1-based line number.

use crate::domain::error::TradeWindowError;
use crate::domain::message::{RawMessage, Topic};
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Split one raw line into a message. The payload bytes are forwarded as-is;
/// only the topic prefix has to be text.
pub fn parse_line(line: &[u8], offset: i64) -> Result<Option<RawMessage>, String> {
    let trimmed = line.trim_ascii_end();
    if trimmed.trim_ascii().is_empty() || trimmed.trim_ascii_start().starts_with(b"#") {
        return Ok(None);
    }
    let tab = trimmed
        .iter()
        .position(|&b| b == b'\t')
        .ok_or_else(|| "expected <topic>\\t<payload>".to_string())?;
    let (topic, payload) = (&trimmed[..tab], &trimmed[tab + 1..]);
    let topic: Topic = std::str::from_utf8(topic)
        .map_err(|e| format!("topic is not UTF-8: {e}"))?
        .parse()?;
    Ok(Some(RawMessage::new(topic, payload).at(0, offset)))
}

/// Forward parsed lines into `tx` until end of input, shutdown, or the
/// receiver is dropped. Returns the number of messages forwarded.
pub async fn forward_lines<R>(
    mut reader: R,
    tx: mpsc::Sender<RawMessage>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<u64, TradeWindowError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut offset: i64 = 0;
    let mut forwarded: u64 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }
        // partial reads stay in `buf` when the shutdown branch wins
        let read = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            read = reader.read_until(b'\n', &mut buf) => read?,
        };
        if read == 0 {
            debug!(lines = offset, "end of input");
            break;
        }
        offset += 1;

        let parsed = parse_line(&buf, offset);
        buf.clear();
        match parsed {
            Ok(Some(message)) => {
                if tx.send(message).await.is_err() {
                    break;
                }
                forwarded += 1;
            }
            Ok(None) => {}
            Err(reason) => warn!(offset, %reason, "skipping unreadable input line"),
        }
    }

    info!(forwarded, "message source stopped");
    Ok(forwarded)
}

/// Forward from `path`, or from stdin when `None`.
pub async fn forward_from(
    path: Option<&Path>,
    tx: mpsc::Sender<RawMessage>,
    shutdown: watch::Receiver<bool>,
) -> Result<u64, TradeWindowError> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "reading messages from file");
            let file = tokio::fs::File::open(path).await?;
            forward_lines(BufReader::new(file), tx, shutdown).await
        }
        None => {
            info!("reading messages from stdin");
            forward_lines(BufReader::new(tokio::io::stdin()), tx, shutdown).await
        }
    }
}
