//! Frame decoder over an HTTP body.
//!
//! Line framing, comment lines, split UTF-8 sequences and CR/LF handling are
//! done by `eventsource-stream`; this layer turns its events into `Frame`s and
//! threads the cancellation token through every poll.
//!
//! Blocks without data (comment-only keepalives, a bare `event: ping`) are
//! dropped by the decoder and never become frames, so they do not count
//! toward `frames_seen`.

use std::pin::Pin;
use std::task::{Context, Poll};

use eventsource_stream::{Event, EventStream, Eventsource};
use futures_util::Stream;

use super::{CancelToken, Frame, FrameData};
use crate::error::{ClientError, ClientResult};

/// Lazy sequence of frames decoded from a byte stream.
pub struct FrameStream<S> {
    inner: EventStream<S>,
    cancel: CancelToken,
    frames: usize,
    last_id: Option<String>,
    finished: bool,
}

impl<S> FrameStream<S> {
    pub fn new(stream: S, cancel: CancelToken) -> Self
    where
        S: Eventsource,
    {
        Self {
            inner: stream.eventsource(),
            cancel,
            frames: 0,
            last_id: None,
            finished: false,
        }
    }

    /// Number of data-carrying frames yielded so far.
    pub fn frames_seen(&self) -> usize {
        self.frames
    }
}

impl From<Event> for Frame {
    fn from(event: Event) -> Self {
        Frame {
            id: (!event.id.is_empty()).then_some(event.id),
            event: (!event.event.is_empty()).then_some(event.event),
            data: FrameData::parse(&event.data),
        }
    }
}

impl<S, E> Stream for FrameStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = ClientResult<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        if self.cancel.is_cancelled() {
            self.finished = true;
            return Poll::Ready(Some(Err(self.cancel.error())));
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => {
                self.frames += 1;
                let mut frame = Frame::from(event);
                // The decoder repeats the last event id on later events.
                if frame.id.is_some() && frame.id == self.last_id {
                    frame.id = None;
                } else if frame.id.is_some() {
                    self.last_id.clone_from(&frame.id);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.finished = true;
                Poll::Ready(Some(Err(ClientError::network(format!(
                    "Stream read error: {e}"
                )))))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::transport::CancelReason;

    const SAMPLE: &str = concat!(
        ": keepalive comment\n",
        "event: metadata\n",
        "data: {\"run_id\":\"r1\"}\n",
        "\n",
        "id: 7\n",
        "event: updates\n",
        "data: {\"market_agent\":\n",
        "data: {\"current_step\":\"market_agent\"}}\n",
        "\n",
        "event: values\n",
        "data: {\"final_report\":\"市場レポート 👋\"}\n",
        "\n",
        "event: debug\n",
        "data: not json at all\n",
        "\n",
    );

    fn chunked(
        data: &[u8],
        splits: &[usize],
    ) -> impl Stream<Item = std::result::Result<bytes::Bytes, std::io::Error>> + Unpin {
        let mut chunks = Vec::new();
        let mut start = 0;
        for &split in splits {
            chunks.push(Ok(bytes::Bytes::copy_from_slice(&data[start..split])));
            start = split;
        }
        chunks.push(Ok(bytes::Bytes::copy_from_slice(&data[start..])));
        futures_util::stream::iter(chunks)
    }

    async fn collect(
        stream: impl Stream<Item = std::result::Result<bytes::Bytes, std::io::Error>> + Unpin,
    ) -> Vec<Frame> {
        let mut frames = FrameStream::new(stream, CancelToken::new());
        let mut out = Vec::new();
        while let Some(frame) = frames.next().await {
            out.push(frame.expect("valid frame"));
        }
        out
    }

    #[tokio::test]
    async fn test_decodes_fields_comments_and_multiline_data() {
        let frames = collect(chunked(SAMPLE.as_bytes(), &[])).await;

        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].event.as_deref(), Some("metadata"));
        assert_eq!(frames[0].as_json(), Some(&json!({"run_id": "r1"})));

        assert_eq!(frames[0].id, None);
        assert_eq!(frames[1].id.as_deref(), Some("7"));
        assert_eq!(frames[2].id, None);
        assert_eq!(frames[3].id, None);
        assert_eq!(
            frames[1].as_json(),
            Some(&json!({"market_agent": {"current_step": "market_agent"}}))
        );

        assert_eq!(
            frames[2].as_json(),
            Some(&json!({"final_report": "市場レポート 👋"}))
        );

        assert_eq!(
            frames[3].data,
            FrameData::Text("not json at all".to_string())
        );
    }

    #[tokio::test]
    async fn test_reassembly_is_invariant_under_chunk_splits() {
        let bytes = SAMPLE.as_bytes();
        let expected = collect(chunked(bytes, &[])).await;

        // Every single split point, including ones inside multi-byte characters.
        for split in 1..bytes.len() {
            let frames = collect(chunked(bytes, &[split])).await;
            assert_eq!(frames, expected, "split at byte {split}");
        }

        // Byte-at-a-time delivery.
        let every_byte: Vec<usize> = (1..bytes.len()).collect();
        let frames = collect(chunked(bytes, &every_byte)).await;
        assert_eq!(frames, expected);
    }

    #[tokio::test]
    async fn test_unterminated_trailing_frame_is_not_emitted() {
        let data = "event: values\ndata: {\"a\":1}\n\nevent: values\ndata: {\"b\":2}";
        let frames = collect(chunked(data.as_bytes(), &[10])).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_json(), Some(&json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_new_id_replaces_previous() {
        let data = "id: 1\ndata: {\"a\":1}\n\ndata: {\"b\":2}\n\nid: 2\ndata: {\"c\":3}\n\n";
        let frames = collect(chunked(data.as_bytes(), &[])).await;

        let ids: Vec<Option<&str>> = frames.iter().map(|f| f.id.as_deref()).collect();
        assert_eq!(ids, vec![Some("1"), None, Some("2")]);
    }

    #[tokio::test]
    async fn test_keepalive_blocks_are_not_frames() {
        let data = ": keepalive\n\nevent: ping\n\nevent: values\ndata: {\"a\":1}\n\n: keepalive\n\n";
        let mut frames = FrameStream::new(chunked(data.as_bytes(), &[]), CancelToken::new());

        let first = frames.next().await.expect("one frame").unwrap();
        assert_eq!(first.event.as_deref(), Some("values"));
        assert!(frames.next().await.is_none());
        assert_eq!(frames.frames_seen(), 1);

        let only_keepalives = collect(chunked(b": ping\n\n: ping\n\n", &[])).await;
        assert!(only_keepalives.is_empty());
    }

    #[tokio::test]
    async fn test_crlf_line_endings() {
        let data = "event: values\r\ndata: {\"a\":1}\r\n\r\nevent: updates\r\ndata: {\"b\":2}\r\n\r\n";
        let frames = collect(chunked(data.as_bytes(), &[5, 17])).await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].event.as_deref(), Some("updates"));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_stream_with_reason() {
        let cancel = CancelToken::new();
        let mut frames = FrameStream::new(chunked(SAMPLE.as_bytes(), &[]), cancel.clone());

        let first = frames.next().await.expect("first frame");
        assert!(first.is_ok());
        assert_eq!(frames.frames_seen(), 1);

        cancel.cancel(CancelReason::Superseded);
        let err = frames.next().await.expect("cancel error").unwrap_err();
        assert!(err.is_superseded());
        assert!(frames.next().await.is_none());
    }
}
