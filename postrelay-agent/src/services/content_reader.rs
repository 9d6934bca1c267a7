//! Task content file parsing
//!
//! ```text
//! 标题：<title>
//! 正文：<body, continuing to end of file>
//! ```

use std::path::Path;

pub const TITLE_PREFIX: &str = "标题：";
pub const BODY_PREFIX: &str = "正文：";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostContent {
    pub title: String,
    pub body: String,
}

/// Parse content text; unrecognised lines leave the field empty
pub fn parse_content(text: &str) -> PostContent {
    let mut lines = text.splitn(2, '\n');
    let first = lines.next().unwrap_or("").trim_end_matches('\r');
    let rest = lines.next().unwrap_or("");

    let title = first
        .strip_prefix(TITLE_PREFIX)
        .map(|t| t.trim().to_string())
        .unwrap_or_default();

    let body = rest
        .strip_prefix(BODY_PREFIX)
        .map(|b| b.replace('\r', "").trim_end().to_string())
        .unwrap_or_default();

    PostContent { title, body }
}

/// Read a content file; a missing or unreadable file yields empty content
pub async fn read_content(path: &Path) -> PostContent {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => parse_content(&text),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Content file unreadable");
            PostContent::default()
        }
    }
}
