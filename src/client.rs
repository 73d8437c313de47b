use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};

use crate::models::{AskResponse, ErrorBody, UploadResponse};
use crate::server::CLIENT_ID_HEADER;

/// What the API said, success or not. Transport failures are `Err` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendReply {
    Success(String),
    Failure { status: u16, error: String },
}

/// HTTP client the UI uses to reach `/upload_pdf/` and `/ask/`.
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build backend http client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn upload_pdf(
        &self,
        client_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<BackendReply> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .context("invalid upload mime type")?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/upload_pdf/", self.base_url))
            .header(CLIENT_ID_HEADER, client_id)
            .multipart(form)
            .send()
            .await
            .context("failed to reach backend /upload_pdf/")?;

        if response.status().is_success() {
            let body = response
                .json::<UploadResponse>()
                .await
                .context("failed to decode /upload_pdf/ response")?;
            return Ok(BackendReply::Success(body.message));
        }

        Ok(failure(response).await)
    }

    pub async fn ask(&self, client_id: &str, question: &str) -> Result<BackendReply> {
        let response = self
            .client
            .post(format!("{}/ask/", self.base_url))
            .header(CLIENT_ID_HEADER, client_id)
            .form(&[("question", question)])
            .send()
            .await
            .context("failed to reach backend /ask/")?;

        if response.status().is_success() {
            let body = response
                .json::<AskResponse>()
                .await
                .context("failed to decode /ask/ response")?;
            return Ok(BackendReply::Success(body.response));
        }

        Ok(failure(response).await)
    }
}

async fn failure(response: Response) -> BackendReply {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let error = serde_json::from_str::<ErrorBody>(&body)
        .map(|parsed| parsed.error)
        .unwrap_or_else(|_| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("backend returned status {status}")
            } else {
                trimmed.to_string()
            }
        });

    BackendReply::Failure { status, error }
}
