//! Response capture and replay.

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AGE, CACHE_CONTROL, CONTENT_LOCATION, DATE, ETAG, EXPIRES, LAST_MODIFIED, VARY},
    },
    response::Response,
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, future, stream};
use http_body_util::{BodyExt, BodyStream, StreamBody};
use thiserror::Error;

use super::store::CacheEntry;

/// Headers a 304 may carry.
const VALIDATOR_HEADERS: [axum::http::HeaderName; 7] = [
    CACHE_CONTROL,
    CONTENT_LOCATION,
    DATE,
    ETAG,
    EXPIRES,
    LAST_MODIFIED,
    VARY,
];

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to buffer response body: {0}")]
    Buffer(String),
}

/// A fully buffered response, ready to be stored.
#[derive(Debug, Clone)]
pub struct Captured {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Result of reading a response body up to a size limit.
#[derive(Debug)]
pub enum Buffered {
    /// The whole body fit; the response replays the captured bytes.
    Complete(Response, Captured),
    /// The body outgrew the limit; the response streams the bytes read so
    /// far followed by the unread remainder.
    TooLarge(Response),
}

/// Read the body of `response`, holding at most `limit` bytes (plus the chunk
/// that crosses it) in memory.
///
/// The returned response always delivers what the handler produced. When the
/// body stream fails, the bytes read before the failure are replayed and the
/// same error then ends the body, as it would have without capture.
pub async fn buffer_response(
    response: Response,
    limit: usize,
) -> Result<Buffered, (Response, CaptureError)> {
    let (parts, mut body) = response.into_parts();
    let mut frames = Vec::new();
    let mut length = 0usize;

    while let Some(next) = body.frame().await {
        match next {
            Ok(frame) => {
                if let Some(chunk) = frame.data_ref() {
                    length = length.saturating_add(chunk.len());
                }
                frames.push(frame);
                if length > limit {
                    let replayed = stream::iter(frames.into_iter().map(Ok::<_, axum::Error>))
                        .chain(BodyStream::new(body));
                    let body = Body::new(StreamBody::new(replayed));
                    return Ok(Buffered::TooLarge(Response::from_parts(parts, body)));
                }
            }
            Err(error) => {
                let reason = error.to_string();
                let replayed = stream::iter(frames.into_iter().map(Ok::<_, axum::Error>))
                    .chain(stream::once(future::ready(Err(error))));
                let body = Body::new(StreamBody::new(replayed));
                return Err((
                    Response::from_parts(parts, body),
                    CaptureError::Buffer(reason),
                ));
            }
        }
    }

    let mut buffer = BytesMut::with_capacity(length);
    for frame in frames {
        if let Ok(chunk) = frame.into_data() {
            buffer.extend_from_slice(&chunk);
        }
    }
    let bytes = buffer.freeze();
    let captured = Captured {
        status: parts.status,
        headers: parts.headers.clone(),
        body: bytes.clone(),
    };
    Ok(Buffered::Complete(
        Response::from_parts(parts, Body::from(bytes)),
        captured,
    ))
}

/// Rebuild a response from a stored entry, adding `Age`.
///
/// `head` replays the headers with an empty body.
pub fn replay(entry: &CacheEntry, age_seconds: u64, head: bool) -> Response {
    let body = if head {
        Body::empty()
    } else {
        Body::from(entry.body.clone())
    };
    let mut response = Response::new(body);
    *response.status_mut() = entry.status;
    *response.headers_mut() = entry.headers.clone();
    response
        .headers_mut()
        .insert(AGE, HeaderValue::from(age_seconds));
    response
}

/// A bodyless 304 carrying only the stored validator headers.
pub fn not_modified(entry: &CacheEntry) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    let headers = response.headers_mut();
    for name in VALIDATOR_HEADERS {
        for value in entry.headers.get_all(&name) {
            headers.append(name.clone(), value.clone());
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
    use time::OffsetDateTime;

    use super::*;

    fn stored() -> CacheEntry {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert(ETAG, HeaderValue::from_static("\"abc\""));
        headers.append(VARY, HeaderValue::from_static("accept"));
        headers.append(VARY, HeaderValue::from_static("accept-language"));
        CacheEntry::new(
            StatusCode::OK,
            headers,
            Bytes::from_static(b"hello"),
            OffsetDateTime::now_utc(),
            Duration::from_secs(60),
        )
    }

    async fn body_of(response: Response) -> Bytes {
        BodyExt::collect(response.into_body())
            .await
            .expect("body should collect")
            .to_bytes()
    }

    #[tokio::test]
    async fn buffered_response_is_passed_through_unchanged() {
        let original = Response::builder()
            .status(StatusCode::CREATED)
            .header(SET_COOKIE, "a=1")
            .body(Body::from("payload"))
            .expect("response should build");

        let Buffered::Complete(rebuilt, captured) = buffer_response(original, 1024)
            .await
            .expect("buffering should succeed")
        else {
            panic!("body fits within the limit");
        };

        assert_eq!(captured.status, StatusCode::CREATED);
        assert_eq!(captured.body, Bytes::from_static(b"payload"));
        assert_eq!(rebuilt.status(), StatusCode::CREATED);
        assert_eq!(rebuilt.headers().get(SET_COOKIE).expect("cookie kept"), "a=1");
        assert_eq!(body_of(rebuilt).await, Bytes::from_static(b"payload"));
    }

    fn streamed(chunks: Vec<Result<&'static str, &'static str>>) -> Response {
        let body = Body::from_stream(stream::iter(chunks.into_iter().map(|chunk| {
            chunk
                .map(|text| Bytes::from_static(text.as_bytes()))
                .map_err(std::io::Error::other)
        })));
        Response::new(body)
    }

    #[tokio::test]
    async fn multi_chunk_body_is_joined() {
        let response = streamed(vec![Ok("ab"), Ok("cd"), Ok("e")]);
        let Buffered::Complete(rebuilt, captured) =
            buffer_response(response, 5).await.expect("buffering should succeed")
        else {
            panic!("body fits within the limit");
        };
        assert_eq!(captured.body, Bytes::from_static(b"abcde"));
        assert_eq!(body_of(rebuilt).await, Bytes::from_static(b"abcde"));
    }

    #[tokio::test]
    async fn body_over_limit_streams_through_intact() {
        let response = streamed(vec![Ok("abc"), Ok("def"), Ok("ghi")]);
        let Buffered::TooLarge(rebuilt) =
            buffer_response(response, 4).await.expect("no body error")
        else {
            panic!("body exceeds the limit");
        };
        assert_eq!(body_of(rebuilt).await, Bytes::from_static(b"abcdefghi"));
    }

    #[tokio::test]
    async fn body_errors_reach_the_client() {
        let response = streamed(vec![Ok("partial"), Err("handler body failed")]);
        let (rebuilt, error) = buffer_response(response, 1024)
            .await
            .expect_err("body error should surface");
        assert!(error.to_string().contains("handler body failed"));

        let mut body = rebuilt.into_body().into_data_stream();
        let first = body.next().await.expect("first chunk").expect("data");
        assert_eq!(first, Bytes::from_static(b"partial"));
        let failure = body.next().await.expect("error item");
        assert!(failure.is_err());
    }

    #[tokio::test]
    async fn replay_restores_entry_and_sets_age() {
        let entry = stored();
        let response = replay(&entry, 7, false);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(AGE).expect("age header"), "7");
        assert_eq!(response.headers().get_all(VARY).iter().count(), 2);
        assert_eq!(body_of(response).await, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn head_replay_has_no_body() {
        let response = replay(&stored(), 0, true);
        assert_eq!(response.headers().get(CONTENT_TYPE).expect("type"), "text/plain");
        assert!(body_of(response).await.is_empty());
    }

    #[tokio::test]
    async fn not_modified_keeps_only_validators() {
        let response = not_modified(&stored());
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers().get(ETAG).expect("etag"), "\"abc\"");
        assert_eq!(response.headers().get_all(VARY).iter().count(), 2);
        assert!(response.headers().get(CONTENT_TYPE).is_none());
        assert!(body_of(response).await.is_empty());
    }
}
