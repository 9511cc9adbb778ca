//! Client for the directory ("recorder") service.
//!
//! Thin request/response layer: every call maps network failure or a
//! non-success status to `ShareError::Remote` and leaves retry policy to
//! the caller. The offload path fails the whole operation; the sync loop
//! swallows announce errors and retries fetches on its next tick.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShareError};

/// One partition entry in a registered manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionEntry {
    pub hash: String,
    pub meta: PartitionMeta,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionMeta {
    pub size: u64,
}

#[derive(Serialize)]
struct CreateFileRequest<'a> {
    name: &'a str,
    size: u64,
    partitions: &'a [PartitionEntry],
}

#[derive(Deserialize)]
struct CreateFileResponse {
    id: u64,
}

/// Summary row from `list-file`; only the id matters to the sync loop.
#[derive(Clone, Debug, Deserialize)]
pub struct FileSummary {
    pub id: u64,
}

#[derive(Deserialize)]
struct ListFilesResponse {
    rows: Vec<FileSummary>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DetailPartition {
    pub hash: String,
}

#[derive(Deserialize)]
struct FileDetailResponse {
    partitions: Vec<DetailPartition>,
}

#[derive(Serialize)]
struct ContributorRequest<'a> {
    contributor: &'a str,
    partition_hash: &'a [String],
}

#[derive(Serialize)]
struct ListContributorsRequest<'a> {
    partition_hash: &'a [String],
}

#[derive(Deserialize)]
struct ListContributorsResponse {
    /// Aligned by index to the request's partition_hash array.
    contributors: Vec<Vec<String>>,
}

pub struct DirectoryClient {
    client: reqwest::Client,
    base_url: String,
}

impl DirectoryClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(ShareError::Remote(format!(
                "recorder returned {} for {}",
                resp.status(),
                resp.url()
            )))
        }
    }

    /// Publish a new file manifest; returns the service-assigned id.
    pub async fn register_file(
        &self,
        name: &str,
        size: u64,
        partitions: &[PartitionEntry],
    ) -> Result<u64> {
        let resp = self
            .client
            .post(format!("{}/v1/create-file", self.base_url))
            .json(&CreateFileRequest { name, size, partitions })
            .send()
            .await?;
        let body: CreateFileResponse = Self::check(resp)?.json().await?;
        Ok(body.id)
    }

    /// Recently registered files, newest first.
    pub async fn list_recent_files(&self, offset: u32, limit: u32) -> Result<Vec<FileSummary>> {
        let resp = self
            .client
            .get(format!(
                "{}/v1/list-file?offset={}&limit={}",
                self.base_url, offset, limit
            ))
            .send()
            .await?;
        let body: ListFilesResponse = Self::check(resp)?.json().await?;
        Ok(body.rows)
    }

    /// Full partition manifest for a registered file.
    pub async fn file_detail(&self, id: u64) -> Result<Vec<DetailPartition>> {
        let resp = self
            .client
            .get(format!("{}/v1/detail-file?id={}", self.base_url, id))
            .send()
            .await?;
        let body: FileDetailResponse = Self::check(resp)?.json().await?;
        Ok(body.partitions)
    }

    /// Tell the recorder which partitions this node currently holds.
    /// Callers treat this as best-effort.
    pub async fn announce_contributor(&self, domain: &str, hashes: &[String]) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/v1/add-contributor", self.base_url))
            .json(&ContributorRequest { contributor: domain, partition_hash: hashes })
            .send()
            .await?;
        Self::check(resp)?;
        Ok(())
    }

    /// Per-partition contributor lists, aligned by index to `hashes`.
    pub async fn list_contributors(&self, hashes: &[String]) -> Result<Vec<Vec<String>>> {
        let resp = self
            .client
            .post(format!("{}/v1/list-contributor", self.base_url))
            .json(&ListContributorsRequest { partition_hash: hashes })
            .send()
            .await?;
        let body: ListContributorsResponse = Self::check(resp)?.json().await?;
        Ok(body.contributors)
    }
}
