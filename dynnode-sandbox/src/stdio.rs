//! Worker protocol over a byte stream (JSON lines)
//!
//! Commands are read one per line; events are written one per line and
//! flushed immediately. Diagnostics go to tracing, never to the writer.

use crate::runtime::Engine;
use crate::worker::Worker;
use crate::Result;
use dynnode_common::{decode_line, encode_line, CodecError, WorkerCommand, WorkerEvent};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;

/// Serve one worker until the reader hits EOF and every queued run is done
pub async fn serve<R, W>(engine: Arc<dyn Engine>, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, mut events) = mpsc::unbounded_channel();
    let mut worker = Some(Worker::spawn(engine, tx)?);
    let mut lines = BufReader::new(reader).lines();
    let mut writer = BufWriter::new(writer);

    loop {
        tokio::select! {
            line = lines.next_line(), if worker.is_some() => {
                match line? {
                    Some(line) => {
                        if let Some(worker) = worker.as_ref() {
                            dispatch(worker, &line)?;
                        }
                    }
                    None => {
                        tracing::debug!("Input closed, finishing queued runs");
                        if let Some(worker) = worker.take() {
                            worker.close();
                        }
                    }
                }
            }
            event = events.recv() => match event {
                Some(event) => write_event(&mut writer, &event).await?,
                None => break,
            },
        }
    }

    writer.flush().await?;
    Ok(())
}

fn dispatch(worker: &Worker, line: &str) -> Result<()> {
    match decode_line::<WorkerCommand>(line) {
        Ok(command) => {
            tracing::debug!(?command, "Command received");
            worker.send(command)?;
        }
        Err(CodecError::Blank) => {}
        Err(e) => tracing::warn!(error = %e, "Ignoring malformed command"),
    }
    Ok(())
}

async fn write_event<W: AsyncWrite + Unpin>(
    writer: &mut BufWriter<W>,
    event: &WorkerEvent,
) -> Result<()> {
    let line = encode_line(event)?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
