//! NDJSON stream decoding shared by the async and blocking clients.
//!
//! [`NdjsonDecoder`] is the state machine; [`decode_stream`] drives it from an
//! async byte stream and [`ChunkIter`] from any [`Read`]. Both hand each complete
//! record to the consumer before reading more bytes.

use std::{
    io::{self, Read},
    marker::PhantomData,
    pin::Pin,
};

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, trace};

use super::models::{ChatStreamChunk, GenerateResponse, OllamaError, ProgressResponse};

/// Lazily decoded sequence of chunks returned by the async client.
pub type ChunkStream<T> = Pin<Box<dyn Stream<Item = Result<T, OllamaError>> + Send + 'static>>;

/// A record type that can appear in a streamed response.
pub trait StreamChunk: DeserializeOwned {
    /// `true` for the final record; nothing is read after it.
    fn is_done(&self) -> bool;
}

impl StreamChunk for ChatStreamChunk {
    fn is_done(&self) -> bool {
        self.done
    }
}

impl StreamChunk for GenerateResponse {
    fn is_done(&self) -> bool {
        self.done
    }
}

impl StreamChunk for ProgressResponse {
    fn is_done(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Accumulating,
    Done,
    Failed,
}

/// Splits bytes on `\n` and decodes each line as one `T`.
///
/// A line that is not JSON, or does not fit `T`, fails with `MalformedStream`; a
/// line carrying a non-empty `{"error": ...}` fails with `Service`. After a failure
/// or a done record the decoder yields nothing more.
#[derive(Debug)]
pub struct NdjsonDecoder<T> {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to hold no newline.
    scanned: usize,
    state: DecoderState,
    _record: PhantomData<fn() -> T>,
}

impl<T> Default for NdjsonDecoder<T> {
    fn default() -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            state: DecoderState::Accumulating,
            _record: PhantomData,
        }
    }
}

impl<T: StreamChunk> NdjsonDecoder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// No more records will be produced.
    pub fn is_finished(&self) -> bool {
        self.state != DecoderState::Accumulating
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        if !self.is_finished() {
            self.buf.extend_from_slice(bytes);
        }
    }

    /// Decodes the next complete record, if the buffer holds one.
    pub fn next_record(&mut self) -> Option<Result<T, OllamaError>> {
        while !self.is_finished() {
            let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') else {
                self.scanned = self.buf.len();
                return None;
            };
            let line: Vec<u8> = self.buf.drain(..=self.scanned + offset).collect();
            self.scanned = 0;
            if let Some(record) = self.decode_line(&line[..line.len() - 1]) {
                return Some(record);
            }
        }
        None
    }

    /// Called at end of input: decodes a trailing record that lacked its newline.
    pub fn finish(&mut self) -> Option<Result<T, OllamaError>> {
        if self.is_finished() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        let record = self.decode_line(&rest);
        if !self.is_finished() {
            self.state = DecoderState::Done;
        }
        record
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<Result<T, OllamaError>> {
        let line = trim_whitespace(line);
        if line.is_empty() {
            return None;
        }

        let record = self.decode_record(line);
        self.state = match &record {
            Ok(chunk) if chunk.is_done() => DecoderState::Done,
            Ok(_) => DecoderState::Accumulating,
            Err(_) => DecoderState::Failed,
        };
        if self.is_finished() {
            self.buf.clear();
            self.scanned = 0;
        }
        Some(record)
    }

    fn decode_record(&self, line: &[u8]) -> Result<T, OllamaError> {
        let value: Value = serde_json::from_slice(line).map_err(|e| {
            error!(%e, raw = %String::from_utf8_lossy(line), "undecodable stream record");
            OllamaError::MalformedStream(format!("invalid JSON record: {e}"))
        })?;

        if let Some(message) = value.get("error").and_then(error_message) {
            error!(%message, "error record in stream");
            return Err(OllamaError::Service { status: None, message });
        }

        let chunk = serde_json::from_value(value).map_err(|e| {
            error!(%e, "stream record does not match the expected shape");
            OllamaError::MalformedStream(format!("unexpected record shape: {e}"))
        })?;
        trace!("decoded stream record");
        Ok(chunk)
    }
}

/// `null`, `false` and `""` in the error slot do not signal a failure.
fn error_message(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn trim_whitespace(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if !first.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    while let [rest @ .., last] = bytes {
        if !last.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    bytes
}

/// Drives a decoder from an async byte stream, one read at a time.
///
/// Dropping the returned stream drops `bytes` and with it the connection.
pub fn decode_stream<T, S, B>(bytes: S) -> ChunkStream<T>
where
    T: StreamChunk + Send + 'static,
    S: Stream<Item = Result<B, OllamaError>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    Box::pin(try_stream! {
        let mut decoder = NdjsonDecoder::<T>::new();
        let mut reads = 0usize;
        futures::pin_mut!(bytes);

        while !decoder.is_finished() {
            match bytes.next().await {
                Some(chunk) => {
                    reads += 1;
                    decoder.feed(chunk?.as_ref());
                    while let Some(record) = decoder.next_record() {
                        yield record?;
                    }
                }
                None => {
                    if let Some(record) = decoder.finish() {
                        yield record?;
                    }
                }
            }
        }
        debug!(reads, "stream finished");
    })
}

/// Blocking iterator over the records of a streamed response body.
///
/// Reads happen only when no complete record is buffered. Dropping the iterator
/// drops the reader, which for an HTTP body closes the connection.
pub struct ChunkIter<T, R> {
    reader: Option<R>,
    decoder: NdjsonDecoder<T>,
    read_buf: Box<[u8]>,
}

const READ_BUF_SIZE: usize = 8 * 1024;

impl<T: StreamChunk, R: Read> ChunkIter<T, R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            decoder: NdjsonDecoder::new(),
            read_buf: vec![0u8; READ_BUF_SIZE].into_boxed_slice(),
        }
    }

    fn read_more(&mut self) -> Result<usize, OllamaError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(0);
        };
        loop {
            match reader.read(&mut self.read_buf) {
                Ok(n) => {
                    self.decoder.feed(&self.read_buf[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(OllamaError::Connection(format!("stream read failed: {e}"))),
            }
        }
    }
}

impl<T: StreamChunk, R: Read> Iterator for ChunkIter<T, R> {
    type Item = Result<T, OllamaError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.decoder.next_record() {
                if self.decoder.is_finished() {
                    self.reader = None;
                }
                return Some(record);
            }
            if self.reader.is_none() {
                return None;
            }

            match self.read_more() {
                Ok(0) => {
                    self.reader = None;
                    return self.decoder.finish();
                }
                Ok(_) => continue,
                Err(e) => {
                    self.reader = None;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use futures::{stream, TryStreamExt};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    const CHAT_STREAM: &str = concat!(
        r#"{"model":"llama3.2","created_at":"t0","message":{"role":"assistant","content":"The"},"done":false}"#, "\n",
        r#"{"model":"llama3.2","created_at":"t1","message":{"role":"assistant","content":" sky"},"done":false}"#, "\r\n",
        "\n",
        r#"{"model":"llama3.2","created_at":"t2","message":{"role":"assistant","content":" is blue"},"done":false}"#, "\n",
        r#"{"model":"llama3.2","created_at":"t3","message":{"role":"assistant","content":""},"done":true,"done_reason":"stop","eval_count":3}"#, "\n",
    );

    /// Reader that hands out the input in fixed pieces.
    struct Fragmented(VecDeque<Vec<u8>>);

    impl Fragmented {
        fn new(data: &[u8], cuts: &[usize]) -> Self {
            let mut pieces = VecDeque::new();
            let mut start = 0;
            let mut cuts: Vec<usize> = cuts.iter().map(|c| c % (data.len() + 1)).collect();
            cuts.sort_unstable();
            for cut in cuts {
                pieces.push_back(data[start..cut.max(start)].to_vec());
                start = cut.max(start);
            }
            pieces.push_back(data[start..].to_vec());
            Self(pieces)
        }
    }

    impl Read for Fragmented {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            let Some(mut piece) = self.0.pop_front() else {
                return Ok(0);
            };
            // an empty piece would read as EOF
            while piece.is_empty() {
                match self.0.pop_front() {
                    Some(next) => piece = next,
                    None => return Ok(0),
                }
            }
            let n = piece.len().min(out.len());
            out[..n].copy_from_slice(&piece[..n]);
            if n < piece.len() {
                self.0.push_front(piece[n..].to_vec());
            }
            Ok(n)
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
        }
    }

    fn contents(chunks: &[ChatStreamChunk]) -> Vec<String> {
        chunks
            .iter()
            .map(|c| c.message.as_ref().map(|m| m.content.clone()).unwrap_or_default())
            .collect()
    }

    #[test]
    fn decodes_records_and_stops_at_done() {
        let data = format!("{CHAT_STREAM}{}\n", r#"{"model":"x","message":{"role":"assistant","content":"late"},"done":false}"#);
        let chunks: Vec<ChatStreamChunk> = ChunkIter::new(data.as_bytes()).collect::<Result<_, _>>().unwrap();

        assert_eq!(contents(&chunks), vec!["The", " sky", " is blue", ""]);
        assert!(chunks.last().unwrap().done);
        assert_eq!(chunks.iter().filter(|c| c.done).count(), 1);
        assert_eq!(chunks.last().unwrap().eval_count, Some(3));
    }

    #[test]
    fn malformed_record_fails_after_earlier_chunks() {
        let data = concat!(
            r#"{"model":"m","response":"a","done":false}"#, "\n",
            r#"{"model":"m","response":"b","done":false}"#, "\n",
            r#"{"model":"m","respo"#, "\n",
            r#"{"model":"m","response":"c","done":true}"#, "\n",
        );
        let items: Vec<Result<GenerateResponse, _>> = ChunkIter::new(data.as_bytes()).collect();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().response, "a");
        assert_eq!(items[1].as_ref().unwrap().response, "b");
        assert!(matches!(items[2], Err(OllamaError::MalformedStream(_))));
    }

    #[test]
    fn wrong_shape_is_malformed() {
        let data = "{\"model\":\"m\",\"done\":\"nope\"}\n";
        let items: Vec<Result<GenerateResponse, _>> = ChunkIter::new(data.as_bytes()).collect();
        assert!(matches!(items.as_slice(), [Err(OllamaError::MalformedStream(_))]));
    }

    #[test]
    fn embedded_error_terminates_stream() {
        let data = concat!(
            r#"{"status":"pulling manifest"}"#, "\n",
            r#"{"error":"pull model manifest: file does not exist"}"#, "\n",
            r#"{"status":"success"}"#, "\n",
        );
        let items: Vec<Result<ProgressResponse, _>> = ChunkIter::new(data.as_bytes()).collect();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().status, "pulling manifest");
        match &items[1] {
            Err(OllamaError::Service { status: None, message }) => {
                assert_eq!(message, "pull model manifest: file does not exist")
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn empty_error_field_does_not_end_stream() {
        let data = concat!(
            r#"{"model":"m","response":"a","done":false,"error":null}"#, "\n",
            r#"{"model":"m","response":"b","done":false,"error":""}"#, "\n",
            r#"{"model":"m","response":"c","done":true,"error":false}"#, "\n",
        );
        let items: Vec<GenerateResponse> = ChunkIter::new(data.as_bytes()).collect::<Result<_, _>>().unwrap();
        let text: Vec<&str> = items.iter().map(|r| r.response.as_str()).collect();
        assert_eq!(text, vec!["a", "b", "c"]);
    }

    #[test]
    fn non_string_error_field_is_kept_verbatim() {
        let data = "{\"error\":{\"code\":7}}\n";
        let items: Vec<Result<ProgressResponse, _>> = ChunkIter::new(data.as_bytes()).collect();
        match items.as_slice() {
            [Err(OllamaError::Service { message, .. })] => assert_eq!(message, r#"{"code":7}"#),
            other => panic!("unexpected items: {other:?}"),
        }
    }

    #[test]
    fn partial_record_is_scanned_once() {
        let record = format!(r#"{{"model":"m","response":"{}","done":true}}"#, "x".repeat(4096));
        let mut decoder = NdjsonDecoder::<GenerateResponse>::new();
        for piece in record.as_bytes().chunks(64) {
            decoder.feed(piece);
            assert!(decoder.next_record().is_none());
            assert_eq!(decoder.scanned, decoder.buf.len());
        }
        decoder.feed(b"\n");
        let decoded = decoder.next_record().unwrap().unwrap();
        assert_eq!(decoded.response.len(), 4096);
        assert!(decoder.is_finished());
        assert_eq!(decoder.scanned, 0);
    }

    #[test]
    fn trailing_record_without_newline_is_decoded() {
        let data = r#"{"status":"writing manifest"}"#.to_string() + "\n" + r#"{"status":"success"}"#;
        let items: Vec<ProgressResponse> = ChunkIter::new(data.as_bytes()).collect::<Result<_, _>>().unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[1].is_done());
    }

    #[test]
    fn read_errors_are_connection_errors() {
        let mut iter = ChunkIter::<GenerateResponse, _>::new(FailingReader);
        assert!(matches!(iter.next(), Some(Err(OllamaError::Connection(_)))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn reads_only_when_no_record_is_buffered() {
        let mut iter = ChunkIter::<ChatStreamChunk, _>::new(Fragmented::new(CHAT_STREAM.as_bytes(), &[]));
        assert!(iter.next().unwrap().is_ok());
        // the whole body arrived in one read; the rest comes from the buffer
        assert!(iter.reader.as_ref().unwrap().0.is_empty());
        assert_eq!(iter.count(), 3);
    }

    #[tokio::test]
    async fn async_stream_matches_blocking_iterator() {
        let pieces: Vec<Result<Vec<u8>, OllamaError>> = CHAT_STREAM
            .as_bytes()
            .chunks(7)
            .map(|c| Ok(c.to_vec()))
            .collect();
        let streamed: Vec<ChatStreamChunk> = decode_stream(stream::iter(pieces)).try_collect().await.unwrap();
        let iterated: Vec<ChatStreamChunk> =
            ChunkIter::new(CHAT_STREAM.as_bytes()).collect::<Result<_, _>>().unwrap();
        assert_eq!(streamed, iterated);
    }

    #[tokio::test]
    async fn async_transport_error_ends_stream() {
        let pieces: Vec<Result<Vec<u8>, OllamaError>> = vec![
            Ok(b"{\"model\":\"m\",\"response\":\"a\",\"done\":false}\n".to_vec()),
            Err(OllamaError::Connection("reset".into())),
            Ok(b"{\"model\":\"m\",\"response\":\"b\",\"done\":true}\n".to_vec()),
        ];
        let items: Vec<Result<GenerateResponse, _>> = decode_stream(stream::iter(pieces)).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(OllamaError::Connection(_))));
    }

    proptest! {
        #[test]
        fn fragmentation_does_not_change_the_sequence(cuts in prop::collection::vec(0usize..400, 0..24)) {
            let whole: Vec<ChatStreamChunk> =
                ChunkIter::new(CHAT_STREAM.as_bytes()).collect::<Result<_, _>>().unwrap();
            let fragmented: Vec<ChatStreamChunk> =
                ChunkIter::new(Fragmented::new(CHAT_STREAM.as_bytes(), &cuts)).collect::<Result<_, _>>().unwrap();
            prop_assert_eq!(whole, fragmented);
        }
    }
}
