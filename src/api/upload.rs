/// Raw content upload (`POST /add`)
use crate::{
    auth::AuthContext,
    context::AppContext,
    error::{PinError, PinResult},
    pins::AddedContent,
};
use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};

/// Multipart field carrying the file
const FILE_FIELD: &str = "file";

/// Build upload routes
pub fn routes() -> Router<AppContext> {
    Router::new().route("/add", post(add_content))
}

fn multipart_error(e: MultipartError) -> PinError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        PinError::PayloadTooLarge("file exceeds maximum upload size".to_string())
    } else {
        PinError::Validation("request must be multipart/form-data with a 'file' field".to_string())
    }
}

/// POST /add
///
/// Uploads the `file` field to the storage network and returns its CID.
/// The content is not pinned; clients follow up with `POST /pins`.
async fn add_content(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    mut multipart: Multipart,
) -> PinResult<Json<AddedContent>> {
    let max_size = ctx.pin_service.max_upload_size();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let mut data = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if data.len() + chunk.len() > max_size {
                return Err(PinError::PayloadTooLarge(format!(
                    "file exceeds maximum upload size of {} bytes",
                    max_size
                )));
            }
            data.extend_from_slice(&chunk);
        }

        tracing::debug!(owner = %auth.principal, size = data.len(), "Received upload");
        let added = ctx.pin_service.add_content(data).await?;
        return Ok(Json(added));
    }

    Err(PinError::Validation(
        "missing 'file' field in multipart form".to_string(),
    ))
}
