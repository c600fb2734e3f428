//! Newline-delimited JSON bridge between a byte stream and the hub.
//!
//! Each input line is one `{ "type": ..., "data": ... }` envelope. Each
//! envelope the hub sends to this context is written as one output line.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use nokey_core::{Hub, MpscChannel};
use nokey_proto::{Outbound, RawEnvelope};

/// Read envelopes until end of input. Lines that are not valid envelopes
/// are logged and skipped. Returns the number of envelopes forwarded.
pub async fn read_envelopes<R>(reader: R, tx: mpsc::Sender<RawEnvelope>) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match RawEnvelope::from_json(line) {
            Ok(raw) => {
                if tx.send(raw).await.is_err() {
                    break;
                }
                forwarded += 1;
            }
            Err(e) => warn!("skipping malformed input line: {e}"),
        }
    }
    Ok(forwarded)
}

/// Write every outbound envelope as one JSON line until the hub drops
/// its side of the channel.
pub async fn write_envelopes<W>(mut writer: W, mut rx: mpsc::Receiver<Outbound>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(envelope) = rx.recv().await {
        let mut line = envelope.to_json();
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Serve one context over `reader`/`writer` until the input ends.
pub async fn serve<R, W>(
    hub: Arc<Hub>,
    origin: &str,
    reader: R,
    writer: W,
    buffer: usize,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (channel, outbound) = MpscChannel::pair(buffer);
    let (tx, inbound) = mpsc::channel(buffer.max(1));

    let writer = tokio::spawn(write_envelopes(writer, outbound));
    let (read, ()) = tokio::join!(
        read_envelopes(reader, tx),
        hub.serve_connection(origin.to_string(), Arc::new(channel), inbound),
    );
    let forwarded = read?;
    writer.await??;
    debug!(origin, forwarded, "input closed");
    Ok(())
}
