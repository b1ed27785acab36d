use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpRequest, HttpResponse};
use anyhow::anyhow;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use super::{ApiError, AppState, SERVE_OUTPUT_ROUTE};
use crate::storage::{VideoId, VideoStore};

const VIDEO_FIELD: &str = "video";

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub file_type: &'static str,
    pub output_video_url: String,
    pub emergency_detected: bool,
    pub frames_processed: u64,
}

/// `POST /detect`
pub(super) async fn detect(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let multipart = Multipart::new(req.headers(), payload);
    let id = receive_upload(multipart, state.job.store(), state.max_upload_bytes).await?;
    log::info!(
        "upload saved: {}",
        state.job.store().upload_path(id).display()
    );

    let job_state = state.clone();
    let outcome = web::block(move || {
        let mut detector = job_state
            .registry
            .create_default()
            .map_err(ApiError::Internal)?;
        job_state
            .job
            .run(id, detector.as_mut())
            .map_err(ApiError::from)
    })
    .await
    .map_err(|err| ApiError::Internal(anyhow!("detection task aborted: {err}")))??;

    let output_video_url = match &state.public_base_url {
        Some(base) => format!("{}/output/{}", base, outcome.output_name),
        None => req
            .url_for(SERVE_OUTPUT_ROUTE, [outcome.output_name.as_str()])
            .map_err(|err| ApiError::Internal(anyhow!("failed to build output url: {err}")))?
            .to_string(),
    };
    log::info!("returning processed video url: {}", output_video_url);

    Ok(HttpResponse::Ok().json(DetectResponse {
        file_type: "video",
        output_video_url,
        emergency_detected: outcome.result.emergency_detected(),
        frames_processed: outcome.result.frames_processed(),
    }))
}

/// Store the first `video` field under a fresh id.
///
/// Nothing is written unless a `video` field is present. Bodies that are not
/// multipart at all are treated the same as a missing field.
async fn receive_upload(
    mut multipart: Multipart,
    store: &VideoStore,
    limit: u64,
) -> Result<VideoId, ApiError> {
    while let Some(field) = multipart.next().await {
        let mut field = match field {
            Ok(field) => field,
            Err(err) => {
                log::debug!("rejecting upload: {}", err);
                return Err(ApiError::MissingVideo);
            }
        };
        if field.name() != Some(VIDEO_FIELD) {
            skip_field(&mut field).await?;
            continue;
        }

        let id = VideoId::generate();
        return match save_field(&mut field, store, id, limit).await {
            Ok(()) => Ok(id),
            Err(err) => {
                store.discard_upload(id);
                Err(err)
            }
        };
    }
    Err(ApiError::MissingVideo)
}

async fn save_field(
    field: &mut Field,
    store: &VideoStore,
    id: VideoId,
    limit: u64,
) -> Result<(), ApiError> {
    let file = store.create_upload(id).map_err(ApiError::Internal)?;
    let mut file = tokio::fs::File::from_std(file);
    let mut written: u64 = 0;
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|err| ApiError::Upload(err.to_string()))?;
        written += chunk.len() as u64;
        if written > limit {
            return Err(ApiError::PayloadTooLarge { limit });
        }
        file.write_all(&chunk)
            .await
            .map_err(|err| ApiError::Internal(anyhow!("failed to write upload: {err}")))?;
    }
    file.sync_all()
        .await
        .map_err(|err| ApiError::Internal(anyhow!("failed to sync upload: {err}")))?;
    log::debug!("received {} byte upload {}", written, id);
    Ok(())
}

async fn skip_field(field: &mut Field) -> Result<(), ApiError> {
    while let Some(chunk) = field.next().await {
        chunk.map_err(|err| ApiError::Upload(err.to_string()))?;
    }
    Ok(())
}
