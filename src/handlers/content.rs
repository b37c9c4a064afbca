//! Streaming file bodies with `Range` support, shared by object downloads,
//! the file browser and share links.

use crate::{errors::AppError, utils::range};
use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use chrono::{DateTime, Utc};
use std::io::SeekFrom;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;

/// How the browser should treat the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
}

/// Describes the entity being served.
pub struct Content<'a> {
    pub size: u64,
    pub content_type: &'a str,
    pub etag: Option<&'a str>,
    pub last_modified: DateTime<Utc>,
    pub file_name: Option<&'a str>,
    pub disposition: Disposition,
}

/// Build a streamed response for `file`, honouring a single byte range.
pub async fn file_response(
    mut file: File,
    content: Content<'_>,
    request_headers: &HeaderMap,
) -> Result<Response, AppError> {
    let requested = request_headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .map(|value| range::parse_range(value, content.size))
        .transpose()
        .map_err(|_| AppError::range_not_satisfiable(content.size))?
        .flatten();

    let (status, length, body) = match requested {
        Some(byte_range) => {
            file.seek(SeekFrom::Start(byte_range.start))
                .await
                .map_err(AppError::internal)?;
            let limited = file.take(byte_range.len());
            (
                StatusCode::PARTIAL_CONTENT,
                byte_range.len(),
                Body::from_stream(ReaderStream::new(limited)),
            )
        }
        None => (
            StatusCode::OK,
            content.size,
            Body::from_stream(ReaderStream::new(file)),
        ),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    set_content_headers(headers, &content, length);
    if let Some(byte_range) = requested {
        if let Ok(value) = HeaderValue::from_str(&byte_range.content_range(content.size)) {
            headers.insert(header::CONTENT_RANGE, value);
        }
    }
    Ok(response)
}

/// Headers shared by GET and HEAD responses.
pub fn set_content_headers(headers: &mut HeaderMap, content: &Content<'_>, length: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if let Some(etag) = content.etag {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }
    let last_modified = content
        .last_modified
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    let kind = match content.disposition {
        Disposition::Inline => "inline",
        Disposition::Attachment => "attachment",
    };
    let disposition = match content.file_name {
        Some(name) => format!("{}; filename=\"{}\"", kind, sanitize_file_name(name)),
        None => kind.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}

/// Keep the filename parameter a valid quoted ASCII header value.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect()
}

/// Guess a MIME type from a file name or key.
pub fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_header_safe() {
        assert_eq!(sanitize_file_name("re\"port\\é.pdf"), "re_port__.pdf");
        assert_eq!(sanitize_file_name("plain.txt"), "plain.txt");
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(guess_mime("photos/a.jpg"), "image/jpeg");
        assert_eq!(guess_mime("README"), "application/octet-stream");
    }
}
