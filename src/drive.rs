//! Microsoft Graph drive listing and file download.

use std::time::Duration;

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::Deserialize;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::token::AccessToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveEntry {
    pub name: String,
    pub is_folder: bool,
    pub is_file: bool,
    pub last_modified_at: DateTime<Utc>,
    pub download_url: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveItem {
    name: String,
    last_modified_date_time: DateTime<Utc>,
    file: Option<FileFacet>,
    folder: Option<serde_json::Value>,
    #[serde(rename = "@microsoft.graph.downloadUrl")]
    download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileFacet {
    mime_type: Option<String>,
}

impl From<DriveItem> for DriveEntry {
    fn from(item: DriveItem) -> Self {
        Self {
            name: item.name,
            is_folder: item.folder.is_some(),
            is_file: item.file.is_some(),
            last_modified_at: item.last_modified_date_time,
            download_url: item.download_url,
            content_type: item.file.and_then(|facet| facet.mime_type),
        }
    }
}

/// A fully received upstream file.
pub struct FileDownload {
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

pub struct GraphDrive {
    http: reqwest::Client,
    graph_base: String,
    drive_id: String,
    max_pages: usize,
    timeout: Duration,
    download_timeout: Duration,
}

impl GraphDrive {
    pub fn new(http: reqwest::Client, config: &GatewayConfig) -> Self {
        Self {
            http,
            graph_base: config.graph_base.clone(),
            drive_id: config.drive_id.clone(),
            max_pages: config.max_pages,
            timeout: config.upstream_timeout(),
            download_timeout: config.download_timeout(),
        }
    }

    /// `{graph}/drives/{drive}/root:/{folder_path}:/children`, with the folder
    /// path encoded as a single segment.
    pub fn children_url(&self, folder_path: &str) -> GatewayResult<Url> {
        let mut url = Url::parse(&self.graph_base).map_err(|error| {
            GatewayError::upstream(None, format!("invalid graph base url: {error}"))
        })?;
        let folder_segment = format!("{folder_path}:");
        url.path_segments_mut()
            .map_err(|_| GatewayError::upstream(None, "graph base url cannot carry a path"))?
            .pop_if_empty()
            .extend([
                "drives",
                self.drive_id.as_str(),
                "root:",
                folder_segment.as_str(),
                "children",
            ]);
        Ok(url)
    }

    /// Lists every child of `folder_path`, following `@odata.nextLink`.
    ///
    /// A failure on any page fails the whole listing; nothing gathered from
    /// earlier pages is returned.
    pub async fn list_all_entries(
        &self,
        folder_path: &str,
        token: &AccessToken,
    ) -> GatewayResult<Vec<DriveEntry>> {
        let first = self.children_url(folder_path)?;
        let mut next = Some(first.clone());
        let mut entries = Vec::new();
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            if pages == self.max_pages {
                return Err(GatewayError::upstream(None, "pagination limit exceeded"));
            }
            pages += 1;

            let page = self.fetch_page(&url, token).await?;
            entries.extend(page.value.into_iter().map(DriveEntry::from));
            next = page
                .next_link
                .map(|link| same_origin_link(&link, &first))
                .transpose()?;
        }

        tracing::debug!(folder = folder_path, pages, entries = entries.len(), "listed folder");
        Ok(entries)
    }

    async fn fetch_page(&self, url: &Url, token: &AccessToken) -> GatewayResult<ChildrenPage> {
        let response = self
            .http
            .get(url.clone())
            .timeout(self.timeout)
            .header(AUTHORIZATION, token.bearer())
            .send()
            .await
            .map_err(GatewayError::transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::upstream(Some(status.as_u16()), body));
        }

        response.json::<ChildrenPage>().await.map_err(|error| {
            GatewayError::upstream(
                Some(status.as_u16()),
                format!("malformed listing response: {error}"),
            )
        })
    }

    /// Fetches `entry` from its pre-authenticated download URL.
    ///
    /// The whole body is read before returning, so a transfer cut short
    /// surfaces as an error instead of a truncated file.
    pub async fn download(&self, entry: &DriveEntry) -> GatewayResult<FileDownload> {
        let url = entry.download_url.as_deref().ok_or_else(|| {
            GatewayError::upstream(None, format!("`{}` has no download url", entry.name))
        })?;

        let response = self
            .http
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(GatewayError::transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::upstream(Some(status.as_u16()), body));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
            .or_else(|| entry.content_type.clone());

        let bytes = response.bytes().await.map_err(GatewayError::transport)?;
        tracing::debug!(file = %entry.name, size = bytes.len(), "downloaded file");

        Ok(FileDownload {
            content_type,
            bytes,
        })
    }
}

/// Parses a `@odata.nextLink`, refusing links that leave the listing's origin
/// so the bearer token is only ever sent to the graph host.
fn same_origin_link(link: &str, listing: &Url) -> GatewayResult<Url> {
    let url = Url::parse(link).map_err(|error| {
        GatewayError::upstream(None, format!("invalid next link `{link}`: {error}"))
    })?;
    if url.origin() != listing.origin() {
        return Err(GatewayError::upstream(
            None,
            format!("next link `{link}` leaves the graph origin"),
        ));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::{DriveEntry, GraphDrive};
    use crate::config::GatewayConfig;
    use crate::error::GatewayError;
    use crate::test_support::{spawn_truncated_download, spawn_upstream};
    use crate::token::AccessToken;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode, Uri};
    use axum::response::{IntoResponse, Response};
    use axum::{Json, Router};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct Pages {
        base: Arc<std::sync::OnceLock<String>>,
        hits: Arc<AtomicUsize>,
        fail_page: Option<usize>,
    }

    fn item(name: &str, minutes: i64, file: bool) -> serde_json::Value {
        let mut value = json!({
            "name": name,
            "lastModifiedDateTime": (Utc::now() - Duration::minutes(minutes)).to_rfc3339(),
        });
        if file {
            value["file"] = json!({ "mimeType": "application/pdf" });
            value["@microsoft.graph.downloadUrl"] = json!(format!("https://dl.example/{name}"));
        } else {
            value["folder"] = json!({ "childCount": 0 });
        }
        value
    }

    async fn paged_listing(State(pages): State<Pages>, uri: Uri, headers: HeaderMap) -> Response {
        assert_eq!(
            headers.get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer graph-token")
        );
        let hit = pages.hits.fetch_add(1, Ordering::SeqCst) + 1;
        if pages.fail_page == Some(hit) {
            return (StatusCode::SERVICE_UNAVAILABLE, "throttled").into_response();
        }
        let base = pages.base.get().unwrap();
        let body = match uri.query() {
            None => json!({
                "value": [item("a.pdf", 3, true), item("Sub", 2, false)],
                "@odata.nextLink": format!("{base}/next?page=2"),
            }),
            Some("page=2") => json!({
                "value": [item("b.pdf", 5, true)],
                "@odata.nextLink": format!("{base}/next?page=3"),
            }),
            Some(_) => json!({ "value": [item("c.pdf", 1, true)] }),
        };
        Json(body).into_response()
    }

    async fn drive_for(fail_page: Option<usize>, max_pages: usize) -> (GraphDrive, Pages) {
        let pages = Pages {
            base: Arc::new(std::sync::OnceLock::new()),
            hits: Arc::new(AtomicUsize::new(0)),
            fail_page,
        };
        let app = Router::new()
            .fallback(paged_listing)
            .with_state(pages.clone());
        let base = spawn_upstream(app).await;
        pages.base.set(base.clone()).unwrap();

        let config = GatewayConfig {
            graph_base: base,
            drive_id: "drive-1".into(),
            max_pages,
            ..GatewayConfig::default()
        };
        (GraphDrive::new(reqwest::Client::new(), &config), pages)
    }

    fn token() -> AccessToken {
        AccessToken {
            value: "graph-token".to_string(),
            expires_at: Utc::now() + Duration::minutes(30),
        }
    }

    #[test]
    fn children_url_encodes_folder_as_one_segment() {
        let config = GatewayConfig {
            graph_base: "https://graph.microsoft.com/v1.0/".into(),
            drive_id: "b!abc".into(),
            ..GatewayConfig::default()
        };
        let drive = GraphDrive::new(reqwest::Client::new(), &config);

        let url = drive
            .children_url("BY Observer/BYSO Files/Bulletin")
            .unwrap();

        assert_eq!(
            url.as_str(),
            "https://graph.microsoft.com/v1.0/drives/b!abc/root:/BY%20Observer%2FBYSO%20Files%2FBulletin:/children"
        );
    }

    #[tokio::test]
    async fn follows_next_links_until_exhausted() {
        let (drive, pages) = drive_for(None, 1000).await;

        let entries = drive.list_all_entries("Bulletin", &token()).await.unwrap();

        assert_eq!(pages.hits.load(Ordering::SeqCst), 3);
        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "Sub", "b.pdf", "c.pdf"]);
        assert!(entries[1].is_folder && !entries[1].is_file);
        assert_eq!(entries[0].content_type.as_deref(), Some("application/pdf"));
        assert_eq!(
            entries[3].download_url.as_deref(),
            Some("https://dl.example/c.pdf")
        );
    }

    #[tokio::test]
    async fn failure_on_later_page_discards_everything() {
        let (drive, pages) = drive_for(Some(2), 1000).await;

        let error = drive
            .list_all_entries("Bulletin", &token())
            .await
            .unwrap_err();

        assert_eq!(pages.hits.load(Ordering::SeqCst), 2);
        match error {
            GatewayError::Upstream { status, message } => {
                assert_eq!(status, Some(503));
                assert_eq!(message, "throttled");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stops_at_page_limit() {
        let (drive, pages) = drive_for(None, 2).await;

        let error = drive
            .list_all_entries("Bulletin", &token())
            .await
            .unwrap_err();

        assert_eq!(pages.hits.load(Ordering::SeqCst), 2);
        assert!(error.to_string().contains("pagination limit exceeded"));
    }

    #[tokio::test]
    async fn download_requires_a_url() {
        let (drive, _) = drive_for(None, 1000).await;
        let entry = DriveEntry {
            name: "orphan.pdf".into(),
            is_folder: false,
            is_file: true,
            last_modified_at: Utc::now(),
            download_url: None,
            content_type: None,
        };

        let error = match drive.download(&entry).await {
            Ok(_) => panic!("download without url should fail"),
            Err(error) => error,
        };
        assert!(matches!(error, GatewayError::Upstream { .. }));
    }

    fn file_entry(name: &str, download_url: String) -> DriveEntry {
        DriveEntry {
            name: name.into(),
            is_folder: false,
            is_file: true,
            last_modified_at: Utc::now(),
            download_url: Some(download_url),
            content_type: None,
        }
    }

    #[tokio::test]
    async fn download_reads_whole_body() {
        let app = Router::new().fallback(|| async {
            ([("content-type", "application/pdf")], "%PDF-1.7 full")
        });
        let base = spawn_upstream(app).await;
        let (drive, _) = drive_for(None, 1000).await;

        let file = drive
            .download(&file_entry("week.pdf", format!("{base}/week.pdf")))
            .await
            .unwrap();

        assert_eq!(file.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(&file.bytes[..], b"%PDF-1.7 full");
    }

    #[tokio::test]
    async fn download_cut_short_is_an_upstream_error() {
        let url = spawn_truncated_download(1000, b"%PDF-").await;
        let (drive, _) = drive_for(None, 1000).await;

        let error = match drive.download(&file_entry("week.pdf", url)).await {
            Ok(file) => panic!("truncated download returned {} bytes", file.bytes.len()),
            Err(error) => error,
        };
        assert!(matches!(error, GatewayError::Upstream { .. }));
        assert_eq!(error.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn next_link_to_another_host_is_refused() {
        let foreign_hits = Arc::new(AtomicUsize::new(0));
        let foreign = {
            let hits = Arc::clone(&foreign_hits);
            let app = Router::new().fallback(move || {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({ "value": [] }))
                }
            });
            spawn_upstream(app).await
        };
        let app = Router::new().fallback(move || {
            let foreign = foreign.clone();
            async move {
                Json(json!({
                    "value": [item("a.pdf", 1, true)],
                    "@odata.nextLink": format!("{foreign}/drives/drive-1/next?page=2"),
                }))
            }
        });
        let base = spawn_upstream(app).await;
        let config = GatewayConfig {
            graph_base: base,
            drive_id: "drive-1".into(),
            ..GatewayConfig::default()
        };
        let drive = GraphDrive::new(reqwest::Client::new(), &config);

        let error = drive
            .list_all_entries("Bulletin", &token())
            .await
            .unwrap_err();

        assert!(error.to_string().contains("leaves the graph origin"));
        assert_eq!(foreign_hits.load(Ordering::SeqCst), 0);
    }
}
