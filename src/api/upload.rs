//! Avatar uploads
//!
//! Files are stored under `upload.path` with a random name and served back
//! from `/uploads/<name>`.

use axum::extract::multipart::Field;
use std::path::Path;
use tokio::fs;
use uuid::Uuid;

use crate::api::middleware::ApiError;
use crate::config::UploadConfig;

/// Validate and store an uploaded image; returns its public path
pub async fn save_image(config: &UploadConfig, field: Field<'_>) -> Result<String, ApiError> {
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());

    if !config.is_type_allowed(&content_type) {
        return Err(ApiError::validation_error(format!(
            "Invalid file type: {}. Allowed types: {:?}",
            content_type, config.allowed_types
        )));
    }

    let data = field
        .bytes()
        .await
        .map_err(|e| ApiError::validation_error(format!("Failed to read file: {}", e)))?;

    store(config, &content_type, &data).await
}

/// Write `data` under a fresh name; returns its public path
pub async fn store(
    config: &UploadConfig,
    content_type: &str,
    data: &[u8],
) -> Result<String, ApiError> {
    if data.is_empty() {
        return Err(ApiError::validation_error("Uploaded file is empty"));
    }
    if data.len() as u64 > config.max_file_size {
        return Err(ApiError::validation_error(format!(
            "File too large. Maximum size: {} bytes ({} MB)",
            config.max_file_size,
            config.max_file_size / 1024 / 1024
        )));
    }

    ensure_upload_dir(&config.path).await?;

    let filename = format!("{}.{}", Uuid::new_v4(), config.extension_for(content_type));
    fs::write(config.path.join(&filename), data)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to save file: {}", e)))?;

    tracing::debug!("Stored upload {} ({} bytes)", filename, data.len());
    Ok(format!("/uploads/{}", filename))
}

/// Ensure upload directory exists
async fn ensure_upload_dir(path: &Path) -> Result<(), ApiError> {
    if !path.exists() {
        fs::create_dir_all(path)
            .await
            .map_err(|e| ApiError::internal_error(format!("Failed to create upload dir: {}", e)))?;
    }
    Ok(())
}
