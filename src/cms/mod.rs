//! Sanity CMS client.
//!
//! Posts are `blogPost` documents created through the mutate endpoint; the
//! featured image is uploaded as an asset first and referenced from
//! `mainImage`. Authentication failures (401/403) are configuration errors:
//! retrying with the same token cannot succeed.

pub mod portable_text;

use crate::error::{PipelineError, Result};
use crate::models::{Draft, ExistingPost, GeneratedArticle};
use crate::utils::truncate_for_log;
use chrono::{DateTime, SecondsFormat, Utc};
use portable_text::markdown_to_portable_text;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

pub const API_VERSION: &str = "v2021-06-07";
pub const RECENT_POSTS_LIMIT: usize = 20;
const POST_FIELDS: &str = r#"{_id, title, "slug": slug.current, excerpt}"#;

/// Where drafts end up.
pub trait Publish {
    /// Recent posts, newest first, for internal linking.
    async fn existing_posts(&self) -> Result<Vec<ExistingPost>>;

    /// Create the post and return its document id.
    async fn publish(&self, draft: &Draft) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct QueryResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct MutateResponse {
    #[serde(default)]
    results: Vec<MutateResult>,
}

#[derive(Debug, Deserialize)]
struct MutateResult {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
    document: AssetDocument,
}

#[derive(Debug, Deserialize)]
struct AssetDocument {
    #[serde(rename = "_id")]
    id: String,
}

/// Sanity HTTP API client for one project and dataset.
///
/// Queries and mutations go to the live API host, not the CDN. A created
/// post's id is read from the first mutation result.
#[derive(Clone)]
pub struct SanityClient {
    client: reqwest::Client,
    project_id: String,
    dataset: String,
    token: String,
    author: String,
}

impl std::fmt::Debug for SanityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SanityClient")
            .field("project_id", &self.project_id)
            .field("dataset", &self.dataset)
            .field("author", &self.author)
            .finish_non_exhaustive()
    }
}

impl SanityClient {
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client; its timeout bounds every request
    /// * `project_id`, `dataset` - Where posts live
    /// * `token` - API token with write access
    /// * `author` - Name stamped on every created post
    pub fn new(
        client: reqwest::Client,
        project_id: impl Into<String>,
        dataset: impl Into<String>,
        token: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            client,
            project_id: project_id.into(),
            dataset: dataset.into(),
            token: token.into(),
            author: author.into(),
        }
    }

    fn api_base(&self) -> String {
        format!("https://{}.api.sanity.io/{}", self.project_id, API_VERSION)
    }

    fn mutate_url(&self) -> String {
        format!("{}/data/mutate/{}", self.api_base(), self.dataset)
    }

    fn query_url(&self, groq: &str) -> String {
        format!(
            "{}/data/query/{}?query={}",
            self.api_base(),
            self.dataset,
            urlencoding::encode(groq)
        )
    }

    fn asset_url(&self, filename: &str) -> String {
        format!(
            "{}/assets/images/{}?filename={}",
            self.api_base(),
            self.dataset,
            urlencoding::encode(filename)
        )
    }

    async fn query<T: DeserializeOwned>(&self, groq: &str) -> Result<T> {
        let resp = self
            .client
            .get(self.query_url(groq))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(publish_transport)?;
        let body = read_body(resp).await?;
        let parsed: QueryResponse<T> = serde_json::from_str(&body)?;
        Ok(parsed.result)
    }

    async fn mutate(&self, mutations: Value) -> Result<MutateResponse> {
        let resp = self
            .client
            .post(self.mutate_url())
            .bearer_auth(&self.token)
            .json(&json!({ "mutations": mutations }))
            .send()
            .await
            .map_err(publish_transport)?;
        let body = read_body(resp).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Every post, newest first.
    #[instrument(level = "info", skip_all)]
    pub async fn all_posts(&self) -> Result<Vec<ExistingPost>> {
        let groq = format!(r#"*[_type == "blogPost"] | order(publishedAt desc) {POST_FIELDS}"#);
        let posts: Vec<ExistingPost> = self.query(&groq).await?;
        info!(count = posts.len(), "Fetched all posts");
        Ok(posts)
    }

    /// Upload PNG bytes and return the asset document id.
    #[instrument(level = "info", skip_all, fields(filename = %filename, bytes = bytes.len()))]
    pub async fn upload_image(&self, bytes: Vec<u8>, filename: &str) -> Result<String> {
        let resp = self
            .client
            .post(self.asset_url(filename))
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(bytes)
            .send()
            .await
            .map_err(publish_transport)?;
        let body = read_body(resp).await?;
        let asset: AssetResponse = serde_json::from_str(&body)?;
        info!(asset_id = %asset.document.id, "Image uploaded");
        Ok(asset.document.id)
    }

    #[instrument(level = "info", skip_all, fields(post_id = %post_id))]
    pub async fn update_title(&self, post_id: &str, title: &str) -> Result<()> {
        self.mutate(json!([{ "patch": { "id": post_id, "set": { "title": title } } }]))
            .await?;
        Ok(())
    }
}

impl Publish for SanityClient {
    #[instrument(level = "info", skip_all)]
    async fn existing_posts(&self) -> Result<Vec<ExistingPost>> {
        let groq = format!(
            r#"*[_type == "blogPost"] | order(publishedAt desc) [0...{RECENT_POSTS_LIMIT}] {POST_FIELDS}"#
        );
        let posts: Vec<ExistingPost> = self.query(&groq).await?;
        info!(count = posts.len(), "Fetched existing posts for internal linking");
        Ok(posts)
    }

    #[instrument(level = "info", skip_all, fields(title = %truncate_for_log(&draft.article.title, 60)))]
    async fn publish(&self, draft: &Draft) -> Result<String> {
        let main_image = match &draft.image {
            Some(bytes) => {
                let filename = format!("{}.png", draft.article.slug);
                match self.upload_image(bytes.clone(), &filename).await {
                    Ok(asset_id) => Some(image_reference(&asset_id, &draft.article.alt_text)),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(error = %e, "Image upload failed; publishing without image");
                        None
                    }
                }
            }
            None => None,
        };

        let document = post_document(&draft.article, &self.author, Utc::now(), main_image);
        let resp = self.mutate(json!([{ "create": document }])).await?;
        let id = resp
            .results
            .into_iter()
            .next()
            .map(|r| r.id)
            .ok_or_else(|| PipelineError::Publish {
                status: 200,
                message: "mutation returned no document id".into(),
            })?;
        info!(post_id = %id, slug = %draft.article.slug, "Post published");
        Ok(id)
    }
}

fn image_reference(asset_id: &str, alt: &str) -> Value {
    json!({
        "_type": "image",
        "asset": { "_type": "reference", "_ref": asset_id },
        "alt": alt,
    })
}

/// The `blogPost` document for an article.
pub fn post_document(
    article: &GeneratedArticle,
    author: &str,
    published_at: DateTime<Utc>,
    main_image: Option<Value>,
) -> Value {
    let mut doc = json!({
        "_type": "blogPost",
        "title": article.title,
        "slug": { "_type": "slug", "current": article.slug },
        "author": author,
        "publishedAt": published_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        "excerpt": article.excerpt,
        "categories": article.categories,
        "body": markdown_to_portable_text(&article.body_markdown),
        "seo": {
            "metaTitle": article.meta_title,
            "metaDescription": article.meta_description,
            "keywords": article.keywords,
        },
        "featured": false,
    });
    if let (Some(image), Some(obj)) = (main_image, doc.as_object_mut()) {
        obj.insert("mainImage".into(), image);
    }
    doc
}

fn publish_transport(e: reqwest::Error) -> PipelineError {
    PipelineError::Publish {
        status: e.status().map(|s| s.as_u16()).unwrap_or(0),
        message: e.to_string(),
    }
}

async fn read_body(resp: reqwest::Response) -> Result<String> {
    let status = resp.status();
    let body = resp.text().await.map_err(publish_transport)?;
    check_status(status, &body)?;
    Ok(body)
}

fn check_status(status: StatusCode, body: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    let message = truncate_for_log(body, 500);
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(PipelineError::Configuration(format!(
            "CMS rejected credentials (HTTP {status}): {message}"
        )));
    }
    Err(PipelineError::Publish {
        status: status.as_u16(),
        message,
    })
}
