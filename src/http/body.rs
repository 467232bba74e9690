//! Streaming of message bodies between connections.
//!
//! Bodies are never collected in memory: they are copied from the reading
//! side to the writing side as they arrive. Chunked bodies keep their chunk
//! framing, so the receiving side sees exactly what the sender produced.

use anyhow::{Context, Result, bail};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read size used when refilling buffers
pub const BUFFER_SIZE: usize = 8192;

/// Longest chunk-size or trailer line accepted
const MAX_LINE: usize = 8 * 1024;

/// How a message body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body follows the head.
    Empty,
    /// Exactly this many bytes follow.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// The body ends when the sender closes the connection.
    UntilClose,
}

/// Copies one body from `buffered` then `reader` into `writer`.
///
/// `buffered` holds bytes already read from `reader`; whatever is left in it
/// after the body (a pipelined request, for instance) stays there.
/// Returns the number of bytes written.
pub async fn copy_body<R, W>(
    framing: BodyFraming,
    reader: &mut R,
    buffered: &mut BytesMut,
    writer: &mut W,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let written = match framing {
        BodyFraming::Empty => 0,
        BodyFraming::Length(len) => copy_exact(reader, buffered, writer, len).await?,
        BodyFraming::Chunked => copy_chunked(reader, buffered, writer).await?,
        BodyFraming::UntilClose => copy_until_close(reader, buffered, writer).await?,
    };

    writer.flush().await?;
    Ok(written)
}

/// Reads and discards one body, used when a request is answered locally.
pub async fn discard_body<R>(
    framing: BodyFraming,
    reader: &mut R,
    buffered: &mut BytesMut,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut sink = tokio::io::sink();
    copy_body(framing, reader, buffered, &mut sink).await
}

async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buffered: &mut BytesMut) -> Result<()> {
    buffered.reserve(BUFFER_SIZE);
    let n = reader.read_buf(buffered).await?;
    if n == 0 {
        bail!("connection closed before body was complete");
    }
    Ok(())
}

async fn copy_exact<R, W>(
    reader: &mut R,
    buffered: &mut BytesMut,
    writer: &mut W,
    len: u64,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut remaining = len;

    while remaining > 0 {
        if buffered.is_empty() {
            fill(reader, buffered).await?;
        }

        let take = (buffered.len() as u64).min(remaining) as usize;
        let chunk = buffered.split_to(take);
        writer.write_all(&chunk).await?;
        remaining -= take as u64;
    }

    Ok(len)
}

async fn copy_chunked<R, W>(reader: &mut R, buffered: &mut BytesMut, writer: &mut W) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;

    loop {
        let line = read_line(reader, buffered).await?;
        let size = parse_chunk_size(&line)?;
        writer.write_all(&line).await?;
        written += line.len() as u64;

        if size == 0 {
            // Trailer section, terminated by an empty line
            loop {
                let trailer = read_line(reader, buffered).await?;
                writer.write_all(&trailer).await?;
                written += trailer.len() as u64;
                if &trailer[..] == b"\r\n" {
                    return Ok(written);
                }
            }
        }

        // Chunk data plus its trailing CRLF
        let Some(framed) = size.checked_add(2) else {
            bail!("chunk size too large: {size}");
        };
        written += copy_exact(reader, buffered, writer, framed).await?;
    }
}

async fn copy_until_close<R, W>(
    reader: &mut R,
    buffered: &mut BytesMut,
    writer: &mut W,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut written = buffered.len() as u64;
    writer.write_all(&buffered[..]).await?;
    buffered.clear();

    let mut temp = [0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut temp).await?;
        if n == 0 {
            return Ok(written);
        }
        writer.write_all(&temp[..n]).await?;
        written += n as u64;
    }
}

/// Splits one CRLF-terminated line (CRLF included) off the buffer.
async fn read_line<R: AsyncRead + Unpin>(reader: &mut R, buffered: &mut BytesMut) -> Result<BytesMut> {
    loop {
        if let Some(pos) = buffered.windows(2).position(|w| w == b"\r\n") {
            return Ok(buffered.split_to(pos + 2));
        }
        if buffered.len() > MAX_LINE {
            bail!("chunk header line too long");
        }
        fill(reader, buffered).await?;
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(line).context("chunk size line is not UTF-8")?;
    let size = text
        .trim_end_matches("\r\n")
        .split(';')
        .next()
        .unwrap_or("")
        .trim();

    u64::from_str_radix(size, 16).with_context(|| format!("invalid chunk size: {size:?}"))
}
