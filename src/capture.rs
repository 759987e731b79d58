use axum::body::Bytes;
use http_body::{Body, Frame, SizeHint};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

pub const MAX_BODY: usize = 10 * 1024;

type OnComplete = Box<dyn FnOnce(CaptureBuffer) + Send + 'static>;

/// Number of bytes of a `requested`-byte chunk that still fit under `cap` once
/// `captured` bytes are held.
///
/// Always `0 <= result <= min(requested, cap - captured)`; zero once the cap is reached.
pub fn capture_len(requested: usize, captured: usize, cap: usize) -> usize {
    let len = requested.min(cap.saturating_sub(captured));
    debug_assert!(len <= requested && len <= cap.saturating_sub(captured));
    len
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureBuffer {
    cap: usize,
    bytes: Vec<u8>,
    truncated: bool,
}

impl CaptureBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            bytes: Vec::new(),
            truncated: false,
        }
    }

    pub fn record(&mut self, chunk: &[u8]) -> usize {
        let len = capture_len(chunk.len(), self.bytes.len(), self.cap);
        self.bytes.extend_from_slice(&chunk[..len]);
        if len < chunk.len() {
            self.truncated = true;
        }
        len
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.bytes)
    }
}

struct Capture {
    buffer: CaptureBuffer,
    on_complete: Option<OnComplete>,
}

impl Capture {
    fn finish(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            let cap = self.buffer.cap;
            on_complete(std::mem::replace(&mut self.buffer, CaptureBuffer::new(cap)));
        }
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.finish();
    }
}

pin_project_lite::pin_project! {
    // The completion callback runs exactly once: on end of stream, on error, or on drop.
    pub struct CaptureBody<B> {
        #[pin]
        inner: B,
        capture: Capture,
    }
}

impl<B> CaptureBody<B> {
    pub fn new<F>(inner: B, cap: usize, on_complete: F) -> Self
    where
        F: FnOnce(CaptureBuffer) + Send + 'static,
    {
        Self {
            inner,
            capture: Capture {
                buffer: CaptureBuffer::new(cap),
                on_complete: Some(Box::new(on_complete)),
            },
        }
    }

    pub fn captured(&self) -> &CaptureBuffer {
        &self.capture.buffer
    }
}

impl<B> Body for CaptureBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let result = ready!(this.inner.poll_frame(cx));
        match &result {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.capture.buffer.record(data);
                }
            }
            Some(Err(_)) | None => this.capture.finish(),
        }
        Poll::Ready(result)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> fmt::Debug for CaptureBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureBody")
            .field("captured", &self.capture.buffer.len())
            .field("cap", &self.capture.buffer.cap)
            .field("truncated", &self.capture.buffer.truncated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{CaptureBody, CaptureBuffer, MAX_BODY, capture_len};
    use axum::body::{Body, Bytes};
    use futures_util::stream;
    use http_body_util::BodyExt;
    use std::io;
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Option<CaptureBuffer>>>;

    fn wrap(body: Body, cap: usize) -> (CaptureBody<Body>, Captured) {
        let captured: Captured = Arc::default();
        let slot = captured.clone();
        let body = CaptureBody::new(body, cap, move |buffer| {
            *slot.lock().expect("lock should succeed") = Some(buffer);
        });
        (body, captured)
    }

    fn chunked(chunks: Vec<&'static [u8]>) -> Body {
        Body::from_stream(stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok::<Bytes, io::Error>(Bytes::from_static(chunk))),
        ))
    }

    #[test]
    fn capture_len_is_clamped() {
        assert_eq!(capture_len(5, 0, 10), 5);
        assert_eq!(capture_len(5, 8, 10), 2);
        assert_eq!(capture_len(5, 10, 10), 0);
        assert_eq!(capture_len(5, 12, 10), 0);
        assert_eq!(capture_len(0, 0, 10), 0);
    }

    #[test]
    fn buffer_never_exceeds_cap() {
        let mut buffer = CaptureBuffer::new(4);
        assert_eq!(buffer.record(b"abc"), 3);
        assert_eq!(buffer.record(b"def"), 1);
        assert_eq!(buffer.record(b"ghi"), 0);
        assert_eq!(buffer.as_bytes(), b"abcd");
        assert!(buffer.is_truncated());
    }

    #[tokio::test]
    async fn small_body_is_captured_exactly() {
        let (body, captured) = wrap(chunked(vec![b"hello ", b"world"]), MAX_BODY);

        let forwarded = body.collect().await.expect("body should stream").to_bytes();
        assert_eq!(&forwarded[..], b"hello world");

        let buffer = captured
            .lock()
            .expect("lock should succeed")
            .take()
            .expect("completion should run");
        assert_eq!(buffer.as_bytes(), b"hello world");
        assert!(!buffer.is_truncated());
    }

    #[tokio::test]
    async fn oversized_body_is_forwarded_in_full() {
        let payload = vec![b'x'; MAX_BODY * 3 + 17];
        let (body, captured) = wrap(Body::from(payload.clone()), MAX_BODY);

        let forwarded = body.collect().await.expect("body should stream").to_bytes();
        assert_eq!(forwarded.len(), payload.len());
        assert_eq!(&forwarded[..], &payload[..]);

        let buffer = captured
            .lock()
            .expect("lock should succeed")
            .take()
            .expect("completion should run");
        assert_eq!(buffer.len(), MAX_BODY);
        assert_eq!(buffer.as_bytes(), &payload[..MAX_BODY]);
        assert!(buffer.is_truncated());
    }

    #[tokio::test]
    async fn cap_boundary_across_chunks() {
        let (body, captured) = wrap(chunked(vec![b"1234", b"5678", b"90"]), 6);

        let forwarded = body.collect().await.expect("body should stream").to_bytes();
        assert_eq!(&forwarded[..], b"1234567890");

        let buffer = captured
            .lock()
            .expect("lock should succeed")
            .take()
            .expect("completion should run");
        assert_eq!(buffer.as_bytes(), b"123456");
    }

    #[tokio::test]
    async fn inner_error_propagates_and_completes_capture() {
        let body = Body::from_stream(stream::iter(vec![
            Ok::<Bytes, io::Error>(Bytes::from_static(b"partial")),
            Err(io::Error::other("upstream reset")),
        ]));
        let (body, captured) = wrap(body, MAX_BODY);

        let result = body.collect().await;
        assert!(result.is_err());

        let buffer = captured
            .lock()
            .expect("lock should succeed")
            .take()
            .expect("completion should run on error");
        assert_eq!(buffer.as_bytes(), b"partial");
    }

    #[test]
    fn dropping_unpolled_body_still_completes() {
        let (body, captured) = wrap(Body::from("never read"), MAX_BODY);
        drop(body);

        let buffer = captured
            .lock()
            .expect("lock should succeed")
            .take()
            .expect("completion should run on drop");
        assert!(buffer.is_empty());
    }
}
