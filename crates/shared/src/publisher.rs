use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};
use url::Url;

use crate::error::ClientError;
use crate::illustration::GeneratedImage;
use crate::markdown::{parse, Block, BlockKind, FormattedText, Inline, RunStyle};

#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub issue_number: i64,
    pub title: String,
    /// Issue body without the subject line
    pub markdown: String,
    pub formatting: FormattedText,
    pub image: Option<GeneratedImage>,
}

#[async_trait]
pub trait DocumentPublisher: Send + Sync {
    /// Create the document and return where it can be opened.
    async fn publish(&self, request: &PublishRequest) -> Result<String>;
}

/// Split a leading `Subject:` line off the draft
pub fn split_subject(markdown: &str) -> (Option<String>, &str) {
    let trimmed = markdown.trim_start();
    let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));
    let line = first.trim().trim_matches('*').trim();
    match line.strip_prefix("Subject:") {
        Some(subject) => {
            let subject = subject.trim().trim_start_matches('*').trim();
            (Some(subject.to_string()), rest.trim_start_matches('\n'))
        }
        None => (None, markdown),
    }
}

/// Remote document service speaking JSON over HTTP
pub struct HttpDocumentPublisher {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct CreateDocumentResponse {
    #[serde(default, rename = "documentUrl")]
    document_url: Option<String>,
    #[serde(default, rename = "documentId")]
    document_id: Option<String>,
}

impl HttpDocumentPublisher {
    pub fn new(base_url: Option<&str>, token: Option<&str>) -> Result<Self, ClientError> {
        let base_url = base_url
            .filter(|u| !u.trim().is_empty())
            .ok_or(ClientError::NotConfigured {
                service: "Document service",
                variable: "DOCUMENT_SERVICE_URL",
            })?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }
}

fn run_json(formatting: &FormattedText) -> Vec<Value> {
    formatting
        .runs
        .iter()
        .map(|run| {
            let style = match &run.style {
                RunStyle::Heading(level) => json!({ "heading": level }),
                RunStyle::Bullet => json!({ "bullet": true }),
                RunStyle::Bold => json!({ "bold": true }),
                RunStyle::Italic => json!({ "italic": true }),
                RunStyle::Code => json!({ "code": true }),
                RunStyle::Link(url) => json!({ "link": url }),
            };
            json!({ "start": run.range.start, "end": run.range.end, "style": style })
        })
        .collect()
}

#[async_trait]
impl DocumentPublisher for HttpDocumentPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<String> {
        let body = json!({
            "title": request.title,
            "text": request.formatting.text,
            "runs": run_json(&request.formatting),
            "image": request.image.as_ref().map(|img| json!({
                "mimeType": img.mime_type,
                "data": img.to_base64(),
            })),
        });

        let mut builder = self
            .client
            .post(format!("{}/documents", self.base_url))
            .json(&body);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .context("Failed to send document request")?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        let created: CreateDocumentResponse = response
            .json()
            .await
            .context("Failed to parse document service response")?;

        let url = match (created.document_url, created.document_id) {
            (Some(url), _) => url,
            (None, Some(id)) => format!("{}/documents/{}", self.base_url, id),
            (None, None) => return Err(ClientError::Empty("document service").into()),
        };
        info!(url = %url, "Document created");
        Ok(url)
    }
}

/// Writes each issue as a standalone HTML page
pub struct HtmlFilePublisher {
    dir: PathBuf,
}

impl HtmlFilePublisher {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn render(request: &PublishRequest, date: DateTime<Utc>) -> String {
        let mut html = String::new();
        let title = escape_html(&request.title);

        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
        html.push_str("  <meta charset=\"UTF-8\">\n");
        html.push_str(&format!("  <title>{}</title>\n", title));
        html.push_str("  <style>\n");
        html.push_str("    body { font-family: Georgia, serif; max-width: 720px; margin: 40px auto; padding: 0 20px; line-height: 1.6; color: #222; }\n");
        html.push_str("    h1 { color: #2c3e50; border-bottom: 3px solid #3498db; padding-bottom: 10px; }\n");
        html.push_str("    h1 .issue { display: block; font-size: 0.5em; font-weight: normal; color: #888; }\n");
        html.push_str("    h2 { color: #34495e; margin-top: 40px; padding: 8px 10px; background-color: #ecf0f1; border-left: 4px solid #3498db; }\n");
        html.push_str("    h3 { color: #2c3e50; margin-top: 25px; }\n");
        html.push_str("    a { color: #2980b9; text-decoration: none; }\n");
        html.push_str("    a:hover { text-decoration: underline; }\n");
        html.push_str("    img.hero { width: 100%; border-radius: 6px; margin: 10px 0 20px 0; }\n");
        html.push_str("    ul { margin: 10px 0; padding-left: 20px; }\n");
        html.push_str("    li { margin: 8px 0; }\n");
        html.push_str("    pre { background: #f8f9fa; padding: 10px; border-radius: 4px; overflow-x: auto; }\n");
        html.push_str("  </style>\n");
        html.push_str("</head>\n<body>\n");

        html.push_str(&format!(
            "<h1><span class=\"issue\">Issue #{} · {}</span>{}</h1>\n",
            request.issue_number,
            date.format("%-d %B %Y"),
            title
        ));
        if let Some(image) = &request.image {
            html.push_str(&format!(
                "<img class=\"hero\" src=\"{}\" alt=\"\">\n",
                image.data_uri()
            ));
        }

        render_blocks(&parse(&request.markdown).blocks, &mut html);

        html.push_str("</body>\n</html>");
        html
    }
}

fn render_blocks(blocks: &[Block], html: &mut String) {
    let mut in_list = false;
    let mut in_code = false;

    for block in blocks {
        if in_list && block.kind != BlockKind::Bullet {
            html.push_str("</ul>\n");
            in_list = false;
        }
        if in_code && block.kind != BlockKind::Code {
            html.push_str("</pre>\n");
            in_code = false;
        }

        match block.kind {
            BlockKind::Blank => {}
            BlockKind::Heading(level) => {
                let level = level.clamp(2, 4);
                html.push_str(&format!(
                    "<h{}>{}</h{}>\n",
                    level,
                    render_inlines(&block.inlines),
                    level
                ));
            }
            BlockKind::Bullet => {
                if !in_list {
                    html.push_str("<ul>\n");
                    in_list = true;
                }
                html.push_str(&format!("  <li>{}</li>\n", render_inlines(&block.inlines)));
            }
            BlockKind::Paragraph => {
                html.push_str(&format!("<p>{}</p>\n", render_inlines(&block.inlines)));
            }
            BlockKind::Code => {
                let line = block.text();
                if line.trim_start().starts_with("```") {
                    continue;
                }
                if !in_code {
                    html.push_str("<pre>");
                    in_code = true;
                }
                html.push_str(&escape_html(&line));
                html.push('\n');
            }
        }
    }

    if in_list {
        html.push_str("</ul>\n");
    }
    if in_code {
        html.push_str("</pre>\n");
    }
}

fn render_inlines(inlines: &[Inline]) -> String {
    let mut out = String::new();
    for inline in inlines {
        match inline {
            Inline::Text(t) => out.push_str(&escape_html(t)),
            Inline::Code(t) => out.push_str(&format!("<code>{}</code>", escape_html(t))),
            Inline::Strong(children) => {
                out.push_str(&format!("<strong>{}</strong>", render_inlines(children)))
            }
            Inline::Emphasis(children) => {
                out.push_str(&format!("<em>{}</em>", render_inlines(children)))
            }
            Inline::Link { text, url } => out.push_str(&format!(
                "<a href=\"{}\" target=\"_blank\">{}</a>",
                escape_html(url),
                render_inlines(&crate::markdown::parse_inlines(text))
            )),
        }
    }
    out
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[async_trait]
impl DocumentPublisher for HtmlFilePublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<String> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create directory: {}", self.dir.display()))?;

        let html = Self::render(request, Utc::now());
        let filepath = self.dir.join(format!("issue-{:03}.html", request.issue_number));
        fs::write(&filepath, html).context("Failed to write issue file")?;

        let absolute = fs::canonicalize(&filepath).context("Failed to resolve issue file path")?;
        let url = Url::from_file_path(&absolute)
            .map_err(|_| anyhow::anyhow!("Not an absolute path: {}", absolute.display()))?;
        debug!(path = %absolute.display(), "Issue written");
        Ok(url.to_string())
    }
}
