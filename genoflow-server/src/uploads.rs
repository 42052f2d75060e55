//! Streaming of multipart job submissions to the upload directory.

use axum::extract::multipart::{Field, Multipart, MultipartError};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use genoflow::core::{InputFile, JobInputs};
use genoflow::submission::{AcceptedPart, SubmissionValidator, UploadDigest};

use crate::error::ApiError;

fn bad_multipart(e: MultipartError) -> ApiError {
    ApiError::BadRequest(format!("malformed multipart body: {e}"))
}

/// Validates and stores every part of a submission.
///
/// Each submission gets its own directory under `upload_dir`. Files are
/// hashed while they are written. Once any part is rejected nothing further
/// is stored, and a rejected submission leaves no files behind.
pub async fn receive_submission(
    mut multipart: Multipart,
    upload_dir: &Path,
) -> Result<JobInputs, ApiError> {
    let submission_dir = upload_dir.join(Uuid::new_v4().to_string());
    let mut validator = SubmissionValidator::new();
    let mut inputs = JobInputs::new();

    let result = async {
        while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);

            let Some(part) = validator.accept(&name, file_name.as_deref()) else {
                continue;
            };
            if validator.has_errors() {
                continue;
            }

            let file = store_part(field, &part, &submission_dir).await?;
            inputs.insert(part.kind, file);
        }
        Ok::<_, ApiError>(())
    }
    .await;

    let outcome = result.and_then(|()| validator.finish().map_err(ApiError::from));
    if let Err(e) = outcome {
        discard(&submission_dir).await;
        return Err(e);
    }
    Ok(inputs)
}

async fn store_part(
    mut field: Field<'_>,
    part: &AcceptedPart,
    dir: &Path,
) -> Result<InputFile, ApiError> {
    tokio::fs::create_dir_all(dir).await?;
    let path: PathBuf = dir.join(format!("{}-{}", part.kind.field_name(), part.file_name));

    let mut file = tokio::fs::File::create(&path).await?;
    let mut digest = UploadDigest::new();
    while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
        digest.update(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    let (size, sha256) = digest.finish();
    debug!(field = %part.kind, path = %path.display(), size, "Upload stored");
    Ok(InputFile::new(part.file_name.clone(), path.display().to_string(), size).with_sha256(sha256))
}

async fn discard(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(path = %dir.display(), "Rejected submission discarded"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %dir.display(), error = %e, "Failed to discard rejected submission"),
    }
}
