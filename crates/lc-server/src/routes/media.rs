//! Upload directory route handlers.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::context::AppContext;
use crate::error::AppError;
use crate::media::MediaFile;

/// GET /api/media
#[utoipa::path(
    get,
    path = "/api/media",
    responses(
        (status = 200, description = "Uploaded media files", body = Vec<MediaFile>)
    )
)]
pub async fn list_media(State(ctx): State<AppContext>) -> Result<Json<Vec<MediaFile>>, AppError> {
    Ok(Json(ctx.media.list().await?))
}

/// POST /api/media -- multipart upload; every part with a file name is stored.
#[utoipa::path(
    post,
    path = "/api/media",
    request_body(content_type = "multipart/form-data", description = "One or more .mp4/.flv files"),
    responses(
        (status = 201, description = "Files stored", body = Vec<MediaFile>),
        (status = 400, description = "Unsupported file type or malformed upload")
    )
)]
pub async fn upload_media(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut stored = Vec::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| lc_core::Error::validation(format!("malformed upload: {e}")))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };

        let mut upload = ctx.media.begin_upload(&file_name).await?;
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(e) = upload.write_chunk(&chunk).await {
                        ctx.media.abort_upload(upload).await;
                        return Err(e.into());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(file = %upload.name(), "Upload interrupted: {e}");
                    ctx.media.abort_upload(upload).await;
                    return Err(
                        lc_core::Error::validation(format!("upload interrupted: {e}")).into(),
                    );
                }
            }
        }
        stored.push(ctx.media.commit_upload(upload).await?);
    }

    if stored.is_empty() {
        return Err(lc_core::Error::validation("no file in upload").into());
    }

    Ok((StatusCode::CREATED, Json(stored)))
}

/// DELETE /api/media/{name}
#[utoipa::path(
    delete,
    path = "/api/media/{name}",
    params(("name" = String, Path, description = "File name")),
    responses(
        (status = 204, description = "File deleted"),
        (status = 404, description = "No such file")
    )
)]
pub async fn delete_media(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    ctx.media.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
