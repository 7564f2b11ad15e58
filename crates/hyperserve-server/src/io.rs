//! Deadline-enforcing IO adapter.
//!
//! Wraps an accepted stream so that every read and write must make progress
//! within its configured deadline, mapping stalls to `TimedOut` errors. The
//! header-read deadline is hyper's concern (`http1::Builder::header_read_timeout`);
//! this adapter covers the body and keep-alive phases.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep, sleep_until};

pin_project! {
    /// Stream wrapper applying read/write deadlines per operation
    #[derive(Debug)]
    pub struct TimeoutIo<S> {
        #[pin]
        inner: S,
        read_timeout: Duration,
        write_timeout: Duration,
        read_deadline: Pin<Box<Sleep>>,
        write_deadline: Pin<Box<Sleep>>,
        read_armed: bool,
        write_armed: bool,
    }
}

impl<S> TimeoutIo<S> {
    /// Wrap `inner` with the given deadlines
    pub fn new(inner: S, read_timeout: Duration, write_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            inner,
            read_timeout,
            write_timeout,
            read_deadline: Box::pin(sleep_until(now + read_timeout)),
            write_deadline: Box::pin(sleep_until(now + write_timeout)),
            read_armed: false,
            write_armed: false,
        }
    }
}

impl<S: AsyncRead> AsyncRead for TimeoutIo<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if !*this.read_armed {
            this.read_deadline
                .as_mut()
                .reset(Instant::now() + *this.read_timeout);
            *this.read_armed = true;
        }
        match this.inner.poll_read(cx, buf) {
            Poll::Ready(result) => {
                *this.read_armed = false;
                Poll::Ready(result)
            }
            Poll::Pending => {
                if this.read_deadline.as_mut().poll(cx).is_ready() {
                    *this.read_armed = false;
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "read deadline exceeded",
                    )));
                }
                Poll::Pending
            }
        }
    }
}

impl<S: AsyncWrite> AsyncWrite for TimeoutIo<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        if !*this.write_armed {
            this.write_deadline
                .as_mut()
                .reset(Instant::now() + *this.write_timeout);
            *this.write_armed = true;
        }
        match this.inner.poll_write(cx, buf) {
            Poll::Ready(result) => {
                *this.write_armed = false;
                Poll::Ready(result)
            }
            Poll::Pending => {
                if this.write_deadline.as_mut().poll(cx).is_ready() {
                    *this.write_armed = false;
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "write deadline exceeded",
                    )));
                }
                Poll::Pending
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_passthrough() {
        let (client, server) = tokio::io::duplex(64);
        let mut wrapped = TimeoutIo::new(server, Duration::from_secs(5), Duration::from_secs(5));
        let mut client = client;

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        wrapped.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        wrapped.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_deadline_fires() {
        let (_client, server) = tokio::io::duplex(64);
        let mut wrapped =
            TimeoutIo::new(server, Duration::from_millis(50), Duration::from_secs(5));
        let mut buf = [0u8; 1];
        let err = wrapped.read_exact(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
