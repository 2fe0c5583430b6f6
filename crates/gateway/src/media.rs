//! Re-hosting file payloads so networks without native uploads get a link.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use crossbar_bridge::{FileInfo, Message};
use crossbar_config::GeneralConfig;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use crate::error::{MediaError, MediaResult};

enum Target {
    Upload(String),
    Directory(PathBuf),
}

pub struct MediaRelay {
    client: Client,
    target: Target,
    download_base: String,
}

/// First eight hex characters of the payload's sha256.
pub fn content_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut hash = hex::encode(digest);
    hash.truncate(8);
    hash
}

/// Replace runs of anything but ASCII alphanumerics with `_` on both sides
/// of the last dot, keeping the dot itself.
pub fn sanitize_file_name(name: &str) -> String {
    let (stem, extension) = match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], Some(&name[dot + 1..])),
        _ => (name, None),
    };

    let mut sanitized = String::with_capacity(name.len());
    push_collapsed(&mut sanitized, stem);
    if let Some(extension) = extension {
        sanitized.push('.');
        push_collapsed(&mut sanitized, extension);
    }
    sanitized
}

fn push_collapsed(out: &mut String, part: &str) {
    let mut in_run = false;
    for c in part.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
}

impl MediaRelay {
    /// `None` unless an upload URL or a local download path is configured.
    /// The upload URL wins when both are set.
    pub fn from_config(general: &GeneralConfig) -> MediaResult<Option<Self>> {
        let target = if !general.media_server_upload.is_empty() {
            Target::Upload(general.media_server_upload.trim_end_matches('/').to_string())
        } else if !general.media_download_path.is_empty() {
            Target::Directory(PathBuf::from(&general.media_download_path))
        } else {
            return Ok(None);
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(general.media_upload_timeout_seconds.max(1)))
            .build()?;
        Ok(Some(Self {
            client,
            target,
            download_base: general.media_server_download.trim_end_matches('/').to_string(),
        }))
    }

    /// Host every file that carries data and record its URL and hash.
    /// Returns how many files were hosted; failures leave the file untouched.
    pub async fn process(&self, message: &mut Message) -> usize {
        let mut hosted = 0;
        for file in &mut message.extra.files {
            match self.host(file).await {
                Ok(()) => hosted += 1,
                Err(MediaError::MissingData(_)) => {}
                Err(err) => {
                    error!(account = %message.account, file = %file.name, error = %err, "media relay failed");
                }
            }
        }
        hosted
    }

    async fn host(&self, file: &mut FileInfo) -> MediaResult<()> {
        let data = file
            .data
            .clone()
            .ok_or_else(|| MediaError::MissingData(file.name.clone()))?;
        let hash = content_hash(&data);
        let name = sanitize_file_name(&file.name);

        match &self.target {
            Target::Upload(base) => self.upload(base, &hash, &name, data).await?,
            Target::Directory(root) => write_local(root, &hash, &name, &data).await?,
        }

        file.url = format!("{}/{}/{}", self.download_base, hash, name);
        file.sha = hash;
        debug!(url = %file.url, "hosted media file");
        Ok(())
    }

    async fn upload(&self, base: &str, hash: &str, name: &str, data: Bytes) -> MediaResult<()> {
        let url = format!("{base}/{hash}/{name}");
        debug!(%url, "uploading media file");
        self.client
            .put(&url)
            .header(CONTENT_TYPE, "binary/octet-stream")
            .body(data)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

async fn write_local(root: &Path, hash: &str, name: &str, data: &[u8]) -> MediaResult<()> {
    let dir = root.join(hash);
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(name);
    debug!(path = %path.display(), "placing media file");
    tokio::fs::write(&path, data).await?;
    Ok(())
}
