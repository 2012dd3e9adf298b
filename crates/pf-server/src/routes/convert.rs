//! Image conversion route.
//!
//! `POST /convert/{target_format}/{mode}/{setting}` with the image in the
//! multipart field `file`. The converted file is streamed back; its workspace
//! travels with the response body and is deleted once the body is finished
//! or dropped.

use axum::body::Body;
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::{Extension, Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use serde::Serialize;
use tokio_util::io::ReaderStream;

use pf_core::{
    check_upload_size, validate_source_filename, ConversionMode, ConversionRequest, Setting,
    TargetFormat,
};
use pf_magick::ConvertedImage;

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

/// Multipart field carrying the image.
pub const FILE_FIELD: &str = "file";

const STREAM_CHUNK: usize = 64 * 1024;

/// Multipart form accepted by the convert route.
#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    /// The source image.
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

/// JSON body of every error response.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub detail: String,
    pub code: String,
    pub request_id: Option<String>,
}

/// POST /convert/{target_format}/{mode}/{setting}
#[utoipa::path(
    post,
    path = "/convert/{target_format}/{mode}/{setting}",
    params(
        ("target_format" = TargetFormat, Path, description = "Output format"),
        ("mode" = ConversionMode, Path, description = "lossless or lossy"),
        ("setting" = u8, Path, description = "0-100: quality (lossy) or effort (lossless)")
    ),
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Converted image", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 400, description = "Missing, unsupported or oversized upload", body = ErrorBody),
        (status = 422, description = "Path parameter out of range", body = ErrorBody),
        (status = 500, description = "Encoder failure", body = ErrorBody),
        (status = 503, description = "AVIF/HEIF encoder unavailable", body = ErrorBody),
        (status = 504, description = "Conversion timed out", body = ErrorBody)
    )
)]
pub async fn convert(
    State(ctx): State<AppContext>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path((target_format, mode, setting)): Path<(String, String, String)>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    convert_inner(ctx, target_format, mode, setting, multipart)
        .await
        .map_err(|e| AppError::new(e).with_request_id(request_id))
}

async fn convert_inner(
    ctx: AppContext,
    target_format: String,
    mode: String,
    setting: String,
    multipart: Result<Multipart, MultipartRejection>,
) -> pf_core::Result<Response> {
    let target: TargetFormat = target_format.parse()?;
    let mode: ConversionMode = mode.parse()?;
    let setting: Setting = setting.parse()?;

    let multipart = multipart.map_err(|e| {
        pf_core::Error::Validation(format!("Expected a multipart/form-data upload: {}", e.body_text()))
    })?;
    let (filename, bytes) = read_upload(multipart, ctx.config.limits.max_upload_mb).await?;

    tracing::info!(
        "Converting {filename} ({} bytes) to {target}/{mode}/{setting}",
        bytes.len()
    );

    let request = ConversionRequest::new(target, mode, setting, filename, bytes)?;
    let image = ctx.converter.convert(request).await?;
    stream_image(image).await
}

/// Read the `file` field, checking the name before the body and the size
/// while streaming.
async fn read_upload(mut multipart: Multipart, max_mb: u64) -> pf_core::Result<(String, Bytes)> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        validate_source_filename(filename.as_deref())?;

        let mut buf = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            check_upload_size((buf.len() + chunk.len()) as u64, max_mb)?;
            buf.extend_from_slice(&chunk);
        }

        return Ok((filename.unwrap_or_default(), buf.freeze()));
    }

    Err(pf_core::Error::Validation(format!(
        "No file uploaded. Send the image in the multipart field '{FILE_FIELD}'."
    )))
}

fn multipart_error(e: MultipartError) -> pf_core::Error {
    pf_core::Error::Validation(format!("Invalid multipart body: {}", e.body_text()))
}

/// Stream the output file; the workspace is released when the body ends.
async fn stream_image(image: ConvertedImage) -> pf_core::Result<Response> {
    let file = tokio::fs::File::open(image.output()).await?;
    let len = image.len();
    let content_type = image.content_type();
    let disposition = content_disposition(image.download_filename());
    let workspace = image.into_workspace();

    let stream = async_stream::stream! {
        let _workspace = workspace;
        let chunks = ReaderStream::with_capacity(file, STREAM_CHUNK);
        for await chunk in chunks {
            yield chunk;
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, len)
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(stream))
        .map_err(|e| pf_core::Error::Internal(format!("failed to build response: {e}")))
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987
/// `filename*` for names outside printable ASCII.
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            ' '..='~' => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}
