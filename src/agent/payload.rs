//! File payload resolution for `attach_file`.

use crate::agent::types::AttachFileArgs;
use crate::error::{AgentError, Result};
use crate::host::{FilePayload, PageHost};
use base64::Engine;
use std::time::Duration;

const DEFAULT_FILE_NAME: &str = "upload.bin";
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Build the file to assign from inline data or a URL fetched with page credentials
pub async fn resolve_payload(
    host: &dyn PageHost,
    args: &AttachFileArgs,
    fetch_timeout: Duration,
) -> Result<FilePayload> {
    let (bytes, detected_mime, url_name) = if let Some(inline) =
        args.data_url.as_deref().or(args.base64.as_deref())
    {
        let (mime, data) = split_data_url(inline);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(strip_whitespace(data))
            .map_err(|e| AgentError::InvalidPayload(e.to_string()))?;
        (bytes, mime, None)
    } else if let Some(url) = args.url.as_deref() {
        let asset = tokio::time::timeout(fetch_timeout, host.fetch_asset(url))
            .await
            .map_err(|_| {
                AgentError::Fetch(format!("{} timed out after {:?}", url, fetch_timeout))
            })?
            .map_err(|e| AgentError::Fetch(format!("{}: {}", url, e)))?;
        if !(200..300).contains(&asset.status) {
            return Err(AgentError::Fetch(format!("{}: HTTP {}", url, asset.status)));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(strip_whitespace(&asset.encoded))
            .map_err(|e| AgentError::Decode(e.to_string()))?;
        let mime = asset
            .content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .filter(|ct| !ct.is_empty());
        (bytes, mime, file_name_from_url(url))
    } else {
        return Err(AgentError::MalformedRequest(
            "attach_file needs one of base64, dataUrl or url".to_string(),
        ));
    };

    if bytes.is_empty() {
        return Err(AgentError::EmptyPayload);
    }

    let name = args
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .or(url_name)
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());
    let mime_type = args
        .mime_type
        .clone()
        .filter(|m| !m.trim().is_empty())
        .or(detected_mime)
        .or_else(|| mime_from_extension(&name).map(|m| m.to_string()))
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

    Ok(FilePayload {
        name,
        mime_type,
        bytes,
    })
}

/// `data:<mime>;base64,<data>` → (mime, data); plain base64 passes through
fn split_data_url(input: &str) -> (Option<String>, &str) {
    let Some(rest) = input.trim().strip_prefix("data:") else {
        return (None, input);
    };
    match rest.split_once(',') {
        Some((meta, data)) => {
            let mime = meta
                .split(';')
                .next()
                .map(|m| m.trim().to_ascii_lowercase())
                .filter(|m| !m.is_empty());
            (mime, data)
        }
        None => (None, rest),
    }
}

fn strip_whitespace(data: &str) -> String {
    data.chars().filter(|c| !c.is_whitespace()).collect()
}

fn file_name_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map_or(path, |(_, rest)| {
        rest.split_once('/').map_or("", |(_, p)| p)
    });
    path.rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_string())
}

fn mime_from_extension(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => return None,
    };
    Some(mime)
}
