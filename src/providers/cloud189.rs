//! Cloud189 Storage Provider
//!
//! Implements StorageProvider/StorageSession for Cloud189 (天翼云盘) using the
//! web API. Authentication is the RSA login handshake in `cloud189_auth`; the
//! resulting session lives in the client's cookie jar, so every login builds
//! a fresh `reqwest::Client`.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use super::cloud189_auth;
use super::http_retry::{send_with_retry, HttpRetryConfig};
use super::{
    AuthError, CapacityQueryError, CapacitySnapshot, Credentials, FileOperationError,
    ProviderType, RemoteFile, ShareDescriptor, ShareDirListing, ShareInfo, ShareLinkError,
    StorageProvider, StorageSession,
};

/// Web API base
pub const API_BASE: &str = "https://cloud.189.cn/api";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36 Edg/134.0.0.0";

/// Listing page size accepted by the web API
const PAGE_SIZE: usize = 60;

/// Upper bound on pages read from one listing
const MAX_PAGES: usize = 200;

/// Cloud189 connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Cloud189Config {
    /// Web API base URL
    pub api_base: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Transport-level retry policy
    pub retry: HttpRetryConfig,
}

impl Default for Cloud189Config {
    fn default() -> Self {
        Self {
            api_base: API_BASE.to_string(),
            timeout_secs: 30,
            retry: HttpRetryConfig::default(),
        }
    }
}

/// Share metadata response (`getShareInfoByCodeV2.action`)
#[derive(Debug, Deserialize)]
struct ShareInfoResponse {
    #[serde(rename = "fileId")]
    file_id: Option<Value>,
    #[serde(rename = "isFolder", default)]
    is_folder: bool,
    #[serde(rename = "fileSize", default)]
    file_size: Option<u64>,
    #[serde(rename = "fileName", default)]
    file_name: Option<String>,
    #[serde(rename = "accessCode", default)]
    access_code: Option<String>,
    #[serde(rename = "shareId")]
    share_id: Option<Value>,
    #[serde(rename = "shareMode")]
    share_mode: Option<Value>,
}

/// Directory listing response (`listShareDir.action`, `listFiles.action`)
#[derive(Debug, Deserialize)]
struct FileListResponse {
    #[serde(rename = "fileListAO")]
    file_list_ao: Option<FileListAO>,
}

#[derive(Debug, Default, Deserialize)]
struct FileListAO {
    #[serde(default)]
    count: Option<u64>,
    #[serde(rename = "fileList", default)]
    file_list: Vec<ListedEntry>,
    #[serde(rename = "folderList", default)]
    folder_list: Vec<ListedEntry>,
}

#[derive(Debug, Deserialize)]
struct ListedEntry {
    id: Value,
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct SizeInfoResponse {
    #[serde(rename = "cloudCapacityInfo")]
    cloud_capacity_info: Option<CapacityInfo>,
}

#[derive(Debug, Deserialize)]
struct CapacityInfo {
    #[serde(rename = "freeSize")]
    free_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CreateFolderResponse {
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BatchTaskResponse {
    #[serde(rename = "taskId")]
    task_id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct SaveTaskInfo<'a> {
    #[serde(rename = "fileId")]
    file_id: &'a str,
    #[serde(rename = "fileName")]
    file_name: &'a str,
    #[serde(rename = "isFolder")]
    is_folder: u8,
}

/// Provider ids arrive as numbers or strings depending on the endpoint.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One page plus the running total, for stopping pagination.
fn page_is_last(ao: &FileListAO, seen: usize) -> bool {
    let on_page = ao.file_list.len() + ao.folder_list.len();
    if on_page == 0 {
        return true;
    }
    match ao.count {
        Some(count) => seen as u64 >= count,
        None => on_page < PAGE_SIZE,
    }
}

/// Cloud189 connector: runs the login handshake and hands out sessions.
pub struct Cloud189Provider {
    config: Cloud189Config,
}

impl Cloud189Provider {
    pub fn new(config: Cloud189Config) -> Self {
        Self { config }
    }

    fn build_client(&self) -> Result<reqwest::Client, AuthError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json;charset=UTF-8"));
        reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| AuthError::Network { step: "client", message: e.to_string() })
    }
}

#[async_trait]
impl StorageProvider for Cloud189Provider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Cloud189
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn StorageSession>, AuthError> {
        let client = self.build_client()?;
        cloud189_auth::login(&client, &self.config.retry, &self.config.api_base, credentials).await?;
        info!("Cloud189 login succeeded for {}", credentials.username);
        Ok(Box::new(Cloud189Session {
            client,
            api_base: self.config.api_base.trim_end_matches('/').to_string(),
            retry: self.config.retry.clone(),
        }))
    }
}

/// Logged-in Cloud189 account. The cookie jar inside `client` is the session.
pub struct Cloud189Session {
    client: reqwest::Client,
    api_base: String,
    retry: HttpRetryConfig,
}

impl Cloud189Session {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Send with transport retry; returns the response only on HTTP 200.
    async fn send(&self, request: RequestBuilder) -> Result<Response, String> {
        let request = request.build().map_err(|e| e.to_string())?;
        let response = send_with_retry(&self.client, request, &self.retry)
            .await
            .map_err(|e| e.to_string())?;
        if response.status() != StatusCode::OK {
            return Err(format!("HTTP {}", response.status().as_u16()));
        }
        Ok(response)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, String> {
        let response = self.send(request).await?;
        response.json::<T>().await.map_err(|e| format!("invalid JSON: {}", e))
    }

    /// Read every page of a folder listing.
    async fn list_all_pages<F>(&self, build: F) -> Result<FileListAO, String>
    where
        F: Fn(usize) -> RequestBuilder,
    {
        let mut merged = FileListAO::default();
        for page in 1..=MAX_PAGES {
            let body: FileListResponse = self.send_json(build(page)).await?;
            let ao = body.file_list_ao.unwrap_or_default();
            let seen = merged.file_list.len() + merged.folder_list.len()
                + ao.file_list.len() + ao.folder_list.len();
            let last = page_is_last(&ao, seen);
            merged.count = ao.count;
            merged.file_list.extend(ao.file_list);
            merged.folder_list.extend(ao.folder_list);
            if last {
                return Ok(merged);
            }
        }
        debug!(target: "cloud189", "listing truncated at {} pages", MAX_PAGES);
        Ok(merged)
    }

    /// Files and subfolders of one of the account's folders, newest first.
    async fn list_folder(&self, folder_id: &str) -> Result<FileListAO, FileOperationError> {
        let page_size = PAGE_SIZE.to_string();
        self.list_all_pages(|page| {
            self.client
                .get(self.url("/open/file/listFiles.action"))
                .query(&[
                    ("pageSize", page_size.as_str()),
                    ("pageNum", page.to_string().as_str()),
                    ("mediaType", "0"),
                    ("folderId", folder_id),
                    ("iconOption", "5"),
                    ("orderBy", "lastOpTime"),
                    ("descending", "true"),
                ])
        })
        .await
        .map_err(|message| FileOperationError::ListFailed {
            folder_id: folder_id.to_string(),
            message,
        })
    }
}

#[async_trait]
impl StorageSession for Cloud189Session {
    async fn capacity(&self) -> Result<CapacitySnapshot, CapacityQueryError> {
        let request = self.client.get(self.url("/portal/getUserSizeInfo.action")).build()
            .map_err(|e| CapacityQueryError::Network(e.to_string()))?;
        let response = send_with_retry(&self.client, request, &self.retry)
            .await
            .map_err(|e| CapacityQueryError::Network(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(CapacityQueryError::Http(response.status().as_u16()));
        }
        let body: SizeInfoResponse = response
            .json()
            .await
            .map_err(|e| CapacityQueryError::Network(format!("invalid JSON: {}", e)))?;
        let info = body
            .cloud_capacity_info
            .ok_or(CapacityQueryError::MissingField("cloudCapacityInfo"))?;
        let free_bytes = info.free_size.ok_or(CapacityQueryError::MissingField("freeSize"))?;
        Ok(CapacitySnapshot { free_bytes })
    }

    async fn share_info(&self, share: &ShareDescriptor) -> Result<ShareInfo, ShareLinkError> {
        let request = self
            .client
            .get(self.url("/open/share/getShareInfoByCodeV2.action"))
            .query(&[("shareCode", share.query_code())])
            .build()
            .map_err(|e| ShareLinkError::Network(e.to_string()))?;
        let response = send_with_retry(&self.client, request, &self.retry)
            .await
            .map_err(|e| ShareLinkError::Network(e.to_string()))?;

        let not_found = || ShareLinkError::NotFound(share.to_string());
        // Expired or cancelled share
        if response.status().is_client_error() {
            return Err(not_found());
        }
        if response.status() != StatusCode::OK {
            return Err(ShareLinkError::Network(format!("HTTP {}", response.status().as_u16())));
        }
        let body: ShareInfoResponse = response
            .json()
            .await
            .map_err(|e| ShareLinkError::Network(format!("invalid JSON: {}", e)))?;

        let file_id = body.file_id.as_ref().and_then(id_string).ok_or_else(not_found)?;
        let share_id = body.share_id.as_ref().and_then(id_string).ok_or_else(not_found)?;
        let share_mode = body.share_mode.as_ref().and_then(id_string).unwrap_or_default();
        let name = body.file_name.unwrap_or_default();

        let entry = if body.is_folder {
            RemoteFile::folder(file_id, name)
        } else {
            RemoteFile::file(file_id, name, body.file_size.unwrap_or(0))
        };
        let access_code = body
            .access_code
            .filter(|c| !c.is_empty())
            .or_else(|| share.access_code().map(str::to_string));

        Ok(ShareInfo { entry, share_id, share_mode, access_code })
    }

    async fn list_share_dir(
        &self,
        folder_id: &str,
        share: &ShareInfo,
    ) -> Result<ShareDirListing, ShareLinkError> {
        let access_code = share.access_code.clone().unwrap_or_default();
        let page_size = PAGE_SIZE.to_string();
        let ao = self
            .list_all_pages(|page| {
                self.client
                    .get(self.url("/open/share/listShareDir.action"))
                    .query(&[
                        ("pageNum", page.to_string().as_str()),
                        ("pageSize", page_size.as_str()),
                        ("fileId", folder_id),
                        ("shareDirFileId", folder_id),
                        ("isFolder", "true"),
                        ("shareId", share.share_id.as_str()),
                        ("shareMode", share.share_mode.as_str()),
                        ("iconOption", "5"),
                        ("orderBy", "lastOpTime"),
                        ("descending", "true"),
                        ("accessCode", access_code.as_str()),
                    ])
            })
            .await
            .map_err(ShareLinkError::Network)?;

        let files = ao
            .file_list
            .into_iter()
            .filter_map(|e| Some(RemoteFile::file(id_string(&e.id)?, e.name, e.size)))
            .collect();
        let folders = ao.folder_list.iter().filter_map(|e| id_string(&e.id)).collect();
        Ok(ShareDirListing { files, folders })
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, FileOperationError> {
        let request = self
            .client
            .post(self.url("/open/file/createFolder.action"))
            .form(&[("folderName", name), ("parentFolderId", parent_id)]);
        let fail = |message: String| FileOperationError::CreateFolder { name: name.to_string(), message };
        let body: CreateFolderResponse = self.send_json(request).await.map_err(fail)?;
        body.id
            .as_ref()
            .and_then(id_string)
            .ok_or_else(|| fail("response has no folder id".to_string()))
    }

    async fn save_share_file(
        &self,
        file: &RemoteFile,
        share: &ShareInfo,
        file_name: &str,
        target_folder_id: &str,
    ) -> Result<(), FileOperationError> {
        let task_infos = serde_json::to_string(&[SaveTaskInfo {
            file_id: &file.file_id,
            file_name,
            is_folder: 0,
        }])
        .map_err(|e| FileOperationError::SubmitFailed(e.to_string()))?;

        let request = self
            .client
            .post(self.url("/open/batch/createBatchTask.action"))
            .form(&[
                ("type", "SHARE_SAVE"),
                ("taskInfos", task_infos.as_str()),
                ("targetFolderId", target_folder_id),
                ("shareId", share.share_id.as_str()),
            ]);
        let response = self.send(request).await.map_err(FileOperationError::SubmitFailed)?;
        // The task id is informational; completion is observed by polling the folder
        if let Ok(body) = response.json::<BatchTaskResponse>().await {
            if let Some(task_id) = body.task_id.as_ref().and_then(id_string) {
                debug!(target: "cloud189", "share save queued as task {}", task_id);
            }
        }
        Ok(())
    }

    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<String>, FileOperationError> {
        let ao = self.list_folder(parent_id).await?;
        Ok(ao
            .folder_list
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| id_string(&e.id)))
    }

    async fn list_files(&self, folder_id: &str) -> Result<Vec<RemoteFile>, FileOperationError> {
        let ao = self.list_folder(folder_id).await?;
        Ok(ao
            .file_list
            .into_iter()
            .filter_map(|e| Some(RemoteFile::file(id_string(&e.id)?, e.name, e.size)))
            .collect())
    }

    async fn rename_file(&self, file_id: &str, new_name: &str) -> Result<(), FileOperationError> {
        let request = self
            .client
            .post(self.url("/open/file/renameFile.action"))
            .form(&[("fileId", file_id), ("destFileName", new_name)]);
        self.send(request).await.map_err(FileOperationError::RenameFailed)?;
        Ok(())
    }
}
