//! The Block Storage calls the Scaleway provider depends on, and their
//! HTTP implementation.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::types::{
    ApiErrorBody, CreateSnapshotBody, CreateVolumeBody, SbsSnapshot, SbsVolume, SnapshotPage,
    UpdateTagsBody, VolumePage,
};
use crate::config::ScalewayConfig;
use crate::error::ClientError;
use crate::provider::BackendFuture;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const BLOCK_API_PATH: &str = "block/v1alpha1";
const PAGE_SIZE: u64 = 100;

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Minimal Block Storage surface used by [`super::SbsProvider`].
pub trait SbsApi: Send + Sync {
    /// `POST /zones/{zone}/volumes`.
    fn create_volume<'a>(
        &'a self,
        zone: &'a str,
        body: &'a CreateVolumeBody,
    ) -> BackendFuture<'a, SbsVolume, ClientError>;

    /// `GET /zones/{zone}/volumes/{id}`.
    fn get_volume<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BackendFuture<'a, SbsVolume, ClientError>;

    /// `GET /zones/{zone}/volumes` filtered by tags.
    fn list_volumes<'a>(
        &'a self,
        zone: &'a str,
        tags: &'a [String],
    ) -> BackendFuture<'a, Vec<SbsVolume>, ClientError>;

    /// `DELETE /zones/{zone}/volumes/{id}`.
    fn delete_volume<'a>(&'a self, zone: &'a str, id: &'a str)
    -> BackendFuture<'a, (), ClientError>;

    /// `PATCH /zones/{zone}/volumes/{id}` replacing the tag list.
    fn update_volume_tags<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
        tags: &'a [String],
    ) -> BackendFuture<'a, SbsVolume, ClientError>;

    /// `POST /zones/{zone}/snapshots`.
    fn create_snapshot<'a>(
        &'a self,
        zone: &'a str,
        body: &'a CreateSnapshotBody,
    ) -> BackendFuture<'a, SbsSnapshot, ClientError>;

    /// `GET /zones/{zone}/snapshots/{id}`.
    fn get_snapshot<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BackendFuture<'a, SbsSnapshot, ClientError>;

    /// `GET /zones/{zone}/snapshots` filtered by tags.
    fn list_snapshots<'a>(
        &'a self,
        zone: &'a str,
        tags: &'a [String],
    ) -> BackendFuture<'a, Vec<SbsSnapshot>, ClientError>;

    /// `DELETE /zones/{zone}/snapshots/{id}`.
    fn delete_snapshot<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BackendFuture<'a, (), ClientError>;

    /// `PATCH /zones/{zone}/snapshots/{id}` replacing the tag list.
    fn update_snapshot_tags<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
        tags: &'a [String],
    ) -> BackendFuture<'a, SbsSnapshot, ClientError>;
}

/// [`SbsApi`] over HTTPS, authenticated with the secret key.
#[derive(Clone)]
pub struct ScalewayBlockClient {
    api_url: String,
    secret_key: String,
}

impl std::fmt::Debug for ScalewayBlockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalewayBlockClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

/// Maps a non-success response onto a [`ClientError`].
pub(crate) fn classify(status: StatusCode, resource: &str, body: &[u8]) -> ClientError {
    let (code, message) = serde_json::from_slice::<ApiErrorBody>(body).map_or_else(
        |_| (String::new(), String::from_utf8_lossy(body).into_owned()),
        |error| (error.error_type, error.message),
    );
    match status {
        StatusCode::NOT_FOUND => ClientError::NotFound {
            resource: resource.to_owned(),
        },
        StatusCode::CONFLICT => ClientError::Conflict { message },
        StatusCode::TOO_MANY_REQUESTS => ClientError::Throttled { message },
        _ => ClientError::Api {
            status: Some(status.as_u16()),
            code,
            message,
        },
    }
}

impl ScalewayBlockClient {
    /// Builds a client from validated configuration.
    #[must_use]
    pub fn new(config: &ScalewayConfig) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            secret_key: config.secret_key.clone(),
        }
    }

    fn url(&self, zone: &str, path: &str) -> String {
        format!("{}/{BLOCK_API_PATH}/zones/{zone}/{path}", self.api_url)
    }

    async fn send(&self, request: RequestBuilder, resource: &str) -> Result<Vec<u8>, ClientError> {
        let response = request
            .header("X-Auth-Token", &self.secret_key)
            .send()
            .await
            .map_err(|err| ClientError::Transport {
                message: err.to_string(),
            })?;
        let status = response.status();
        let body = response.bytes().await.map_err(|err| ClientError::Transport {
            message: err.to_string(),
        })?;
        if status.is_success() {
            return Ok(body.to_vec());
        }
        debug!(%status, resource, "block storage request failed");
        Err(classify(status, resource, &body))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: &str,
    ) -> Result<T, ClientError> {
        let body = self.send(request, resource).await?;
        serde_json::from_slice(&body).map_err(|err| ClientError::Malformed {
            message: err.to_string(),
        })
    }

    fn list_request(&self, zone: &str, path: &str, tags: &[String], page: u64) -> RequestBuilder {
        let mut query: Vec<(&str, String)> = vec![
            ("page", page.to_string()),
            ("page_size", PAGE_SIZE.to_string()),
        ];
        query.extend(tags.iter().map(|tag| ("tags", tag.clone())));
        HTTP_CLIENT.get(self.url(zone, path)).query(&query)
    }
}

impl SbsApi for ScalewayBlockClient {
    fn create_volume<'a>(
        &'a self,
        zone: &'a str,
        body: &'a CreateVolumeBody,
    ) -> BackendFuture<'a, SbsVolume, ClientError> {
        Box::pin(async move {
            let request = HTTP_CLIENT.post(self.url(zone, "volumes")).json(body);
            self.send_json(request, &body.name).await
        })
    }

    fn get_volume<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BackendFuture<'a, SbsVolume, ClientError> {
        Box::pin(async move {
            let request = HTTP_CLIENT.get(self.url(zone, &format!("volumes/{id}")));
            self.send_json(request, id).await
        })
    }

    fn list_volumes<'a>(
        &'a self,
        zone: &'a str,
        tags: &'a [String],
    ) -> BackendFuture<'a, Vec<SbsVolume>, ClientError> {
        Box::pin(async move {
            let mut volumes = Vec::new();
            let mut page = 1_u64;
            loop {
                let request = self.list_request(zone, "volumes", tags, page);
                let listed: VolumePage = self.send_json(request, "volumes").await?;
                let received = listed.volumes.len();
                volumes.extend(listed.volumes);
                let collected = u64::try_from(volumes.len()).unwrap_or(u64::MAX);
                if received == 0 || collected >= listed.total_count {
                    return Ok(volumes);
                }
                page = page.saturating_add(1);
            }
        })
    }

    fn delete_volume<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BackendFuture<'a, (), ClientError> {
        Box::pin(async move {
            let request = HTTP_CLIENT.delete(self.url(zone, &format!("volumes/{id}")));
            self.send(request, id).await.map(|_| ())
        })
    }

    fn update_volume_tags<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
        tags: &'a [String],
    ) -> BackendFuture<'a, SbsVolume, ClientError> {
        Box::pin(async move {
            let request = HTTP_CLIENT
                .patch(self.url(zone, &format!("volumes/{id}")))
                .json(&UpdateTagsBody { tags });
            self.send_json(request, id).await
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        zone: &'a str,
        body: &'a CreateSnapshotBody,
    ) -> BackendFuture<'a, SbsSnapshot, ClientError> {
        Box::pin(async move {
            let request = HTTP_CLIENT.post(self.url(zone, "snapshots")).json(body);
            self.send_json(request, &body.volume_id).await
        })
    }

    fn get_snapshot<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BackendFuture<'a, SbsSnapshot, ClientError> {
        Box::pin(async move {
            let request = HTTP_CLIENT.get(self.url(zone, &format!("snapshots/{id}")));
            self.send_json(request, id).await
        })
    }

    fn list_snapshots<'a>(
        &'a self,
        zone: &'a str,
        tags: &'a [String],
    ) -> BackendFuture<'a, Vec<SbsSnapshot>, ClientError> {
        Box::pin(async move {
            let mut snapshots = Vec::new();
            let mut page = 1_u64;
            loop {
                let request = self.list_request(zone, "snapshots", tags, page);
                let listed: SnapshotPage = self.send_json(request, "snapshots").await?;
                let received = listed.snapshots.len();
                snapshots.extend(listed.snapshots);
                let collected = u64::try_from(snapshots.len()).unwrap_or(u64::MAX);
                if received == 0 || collected >= listed.total_count {
                    return Ok(snapshots);
                }
                page = page.saturating_add(1);
            }
        })
    }

    fn delete_snapshot<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BackendFuture<'a, (), ClientError> {
        Box::pin(async move {
            let request = HTTP_CLIENT.delete(self.url(zone, &format!("snapshots/{id}")));
            self.send(request, id).await.map(|_| ())
        })
    }

    fn update_snapshot_tags<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
        tags: &'a [String],
    ) -> BackendFuture<'a, SbsSnapshot, ClientError> {
        Box::pin(async move {
            let request = HTTP_CLIENT
                .patch(self.url(zone, &format!("snapshots/{id}")))
                .json(&UpdateTagsBody { tags });
            self.send_json(request, id).await
        })
    }
}
