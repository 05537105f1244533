//! Signed links into the local LFS object store
//!
//! Stands in for the presigned URLs of an object store: batch download
//! actions and transfer redirects point here.

use crate::backend::LocalLfsBackend;
use crate::{Error, Result};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use base64::Engine;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
pub struct LinkQuery {
    expires: i64,
    signature: String,
    /// base64url of the `save_as` name
    filename: Option<String>,
}

/// GET /_storage/lfs/{oid}?expires=&signature=[&filename=]
pub async fn fetch_object(
    State(lfs): State<Arc<LocalLfsBackend>>,
    Path(oid): Path<String>,
    Query(link): Query<LinkQuery>,
) -> Result<Response> {
    let filename = match link.filename.as_deref() {
        Some(encoded) => Some(decode_filename(encoded)?),
        None => None,
    };
    if !lfs.check_link(&oid, link.expires, filename.as_deref(), &link.signature) {
        return Err(Error::forbidden("invalid or expired link"));
    }

    let file = lfs.store().open(&oid).await?;
    let length = file
        .metadata()
        .await
        .map_err(|e| Error::Internal(e.into()))?
        .len();

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Some(name) = filename {
        let disposition = HeaderValue::try_from(format!("attachment;filename={}", name))
            .map_err(|_| Error::invalid("filename", "filename is not a valid header value"))?;
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }
    Ok(response)
}

fn decode_filename(encoded: &str) -> Result<String> {
    let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| Error::invalid("filename", "filename is not base64url"))?;
    String::from_utf8(raw).map_err(|_| Error::invalid("filename", "filename is not utf-8"))
}
