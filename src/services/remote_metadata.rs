use async_trait::async_trait;

use crate::errors::{PatcherError, Result};
use crate::models::{
    ChunksData, ContentSummary, DiffSummary, RemoteResource, ResourceUrl, TorrentUrl, VersionId,
    VersionIdResponse,
};
use crate::services::api_client::ApiClient;

/// Read-only view of the published versions of one application.
#[async_trait]
pub trait RemoteMetaData: Send + Sync {
    async fn get_latest_version_id(&self) -> Result<VersionId>;
    async fn get_content_summary(&self, version: VersionId) -> Result<ContentSummary>;
    async fn get_diff_summary(&self, version: VersionId) -> Result<DiffSummary>;
    async fn get_content_package_resource(
        &self,
        version: VersionId,
        key_secret: Option<&str>,
    ) -> Result<RemoteResource>;
    async fn get_diff_package_resource(
        &self,
        version: VersionId,
        key_secret: Option<&str>,
    ) -> Result<RemoteResource>;
}

fn check_version(version: VersionId) -> Result<()> {
    if version < 1 {
        return Err(PatcherError::InvalidOperation(format!(
            "invalid version id {}",
            version
        )));
    }
    Ok(())
}

pub struct ApiRemoteMetaData {
    api: ApiClient,
    app_secret: String,
}

impl ApiRemoteMetaData {
    pub fn new(api: ApiClient, app_secret: String) -> Self {
        Self { api, app_secret }
    }

    fn version_path(&self, version: VersionId, leaf: &str) -> String {
        format!("1/apps/{}/versions/{}/{}", self.app_secret, version, leaf)
    }

    async fn package_urls(
        &self,
        version: VersionId,
        kind: &str,
        key_secret: Option<&str>,
    ) -> Result<PackageUrls> {
        let query: Vec<(&str, &str)> = key_secret.map(|key| vec![("key_secret", key)]).unwrap_or_default();
        let urls: Vec<ResourceUrl> = self
            .api
            .get(&self.version_path(version, &format!("{}_urls", kind)), &query)
            .await?;
        let torrent_urls = match self
            .api
            .get::<TorrentUrl>(&self.version_path(version, &format!("{}_torrent_url", kind)), &query)
            .await
        {
            Ok(torrent) => vec![torrent.url],
            Err(err) => {
                tracing::debug!("no torrent for {} package of version {}: {}", kind, version, err);
                Vec::new()
            }
        };
        let meta_urls = urls.iter().filter_map(|url| url.meta_url.clone()).collect();
        Ok(PackageUrls {
            urls: urls.into_iter().map(|url| url.url).collect(),
            meta_urls,
            torrent_urls,
        })
    }
}

struct PackageUrls {
    urls: Vec<String>,
    meta_urls: Vec<String>,
    torrent_urls: Vec<String>,
}

impl PackageUrls {
    fn into_resource(self, size: u64, hash_code: Option<String>, chunks: Option<ChunksData>) -> RemoteResource {
        RemoteResource {
            urls: self.urls,
            torrent_urls: self.torrent_urls,
            meta_urls: self.meta_urls,
            size,
            hash_code,
            chunks,
        }
    }
}

#[async_trait]
impl RemoteMetaData for ApiRemoteMetaData {
    async fn get_latest_version_id(&self) -> Result<VersionId> {
        let path = format!("1/apps/{}/versions/latest/id", self.app_secret);
        let response: VersionIdResponse = self.api.get(&path, &[]).await?;
        check_version(response.id)?;
        Ok(response.id)
    }

    async fn get_content_summary(&self, version: VersionId) -> Result<ContentSummary> {
        check_version(version)?;
        self.api
            .get(&self.version_path(version, "content_summary"), &[])
            .await
    }

    async fn get_diff_summary(&self, version: VersionId) -> Result<DiffSummary> {
        check_version(version)?;
        self.api
            .get(&self.version_path(version, "diff_summary"), &[])
            .await
    }

    async fn get_content_package_resource(
        &self,
        version: VersionId,
        key_secret: Option<&str>,
    ) -> Result<RemoteResource> {
        let summary = self.get_content_summary(version).await?;
        let urls = self.package_urls(version, "content", key_secret).await?;
        Ok(urls.into_resource(summary.size, summary.hash_code, summary.chunks))
    }

    async fn get_diff_package_resource(
        &self,
        version: VersionId,
        key_secret: Option<&str>,
    ) -> Result<RemoteResource> {
        let summary = self.get_diff_summary(version).await?;
        let urls = self.package_urls(version, "diff", key_secret).await?;
        Ok(urls.into_resource(summary.size, summary.hash_code, summary.chunks))
    }
}
