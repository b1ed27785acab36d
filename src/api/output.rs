use std::io::{self, SeekFrom};

use actix_web::body::SizedStream;
use actix_web::http::{header, StatusCode};
use actix_web::web::{self, Bytes};
use actix_web::{HttpRequest, HttpResponse};
use async_stream::stream;
use futures_util::Stream;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{ApiError, AppState};
use crate::error::ServeError;
use crate::range::{parse_range, ByteRange};

const CHUNK_SIZE: usize = 64 * 1024;
const VIDEO_MP4: &str = "video/mp4";

/// `GET /output/{filename}`
pub(super) async fn serve_output(
    req: HttpRequest,
    filename: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let filename = filename.into_inner();
    let path = state
        .job
        .store()
        .resolve_output(&filename)
        .ok_or(ServeError::NotFound)?;

    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(ServeError::NotFound.into())
        }
        Err(err) => return Err(ServeError::Io(err).into()),
    };
    let size = file.metadata().await.map_err(ServeError::Io)?.len();

    let range = match req.headers().get(header::RANGE) {
        None => None,
        Some(value) => {
            let parsed = value
                .to_str()
                .map_err(|_| ServeError::RangeNotSatisfiable { size })
                .and_then(|value| {
                    parse_range(value, size).map_err(|err| {
                        log::debug!("{}: {}", filename, err);
                        ServeError::RangeNotSatisfiable { size }
                    })
                })?;
            Some(parsed)
        }
    };

    let mut response = match range {
        Some(window) => {
            let mut response = HttpResponse::build(StatusCode::PARTIAL_CONTENT);
            response.insert_header((header::CONTENT_RANGE, window.content_range(size)));
            response
        }
        None => HttpResponse::Ok(),
    };
    let window = range.unwrap_or(ByteRange {
        start: 0,
        end: size.saturating_sub(1),
    });
    let len = if size == 0 { 0 } else { window.len() };

    if window.start > 0 {
        file.seek(SeekFrom::Start(window.start))
            .await
            .map_err(ServeError::Io)?;
    }

    Ok(response
        .insert_header((header::CONTENT_TYPE, VIDEO_MP4))
        .insert_header((header::ACCEPT_RANGES, "bytes"))
        .body(SizedStream::new(len, Box::pin(read_window(file, len)))))
}

/// Stream exactly `len` bytes from the file's current position.
fn read_window(mut file: tokio::fs::File, len: u64) -> impl Stream<Item = io::Result<Bytes>> {
    stream! {
        let mut remaining = len;
        let mut buf = vec![0u8; CHUNK_SIZE];
        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE as u64) as usize;
            match file.read(&mut buf[..want]).await {
                Ok(0) => {
                    yield Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file shorter than advertised",
                    ));
                    break;
                }
                Ok(n) => {
                    remaining -= n as u64;
                    yield Ok(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(err) => {
                    yield Err(err);
                    break;
                }
            }
        }
    }
}
