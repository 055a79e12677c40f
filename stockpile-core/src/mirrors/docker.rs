//! OCI/Docker Registry v2 adapter.
//!
//! Grammar under `/v2/`: `<image>/tags/list`, `<image>/manifests/<ref>`,
//! `<image>/blobs/sha256:<digest>`, and `/token`. Single-segment image
//! names are official images and gain the `library/` prefix. Manifests are
//! fetched with the v2 manifest Accept header and served with a
//! `Docker-Content-Digest` computed over the stored bytes; blobs are
//! content-addressed and effectively immutable.
//!
//! `/token` mints a short-lived opaque local token; upstream requests carry
//! configured Basic credentials only. There is no upstream token exchange.

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::{Digest, Sha256};
use stockpile_model::CacheStats;
use uuid::Uuid;

use super::{MirrorAdapter, MirrorContext, MirrorRequest, MirrorResponse};
use crate::error::{CoreError, Result};
use crate::fetch::FetchOptions;

const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
const TOKEN_TTL_SECS: i64 = 300;

#[derive(Debug)]
pub struct DockerMirror {
    context: MirrorContext,
    token_secret: String,
}

impl DockerMirror {
    pub(crate) fn new(context: MirrorContext, token_secret: String) -> Self {
        Self {
            context,
            token_secret,
        }
    }

    fn upstream_auth(&self) -> Option<(String, String)> {
        match (&self.context.entry.username, &self.context.entry.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        }
    }

    fn fetch_options(&self, accept: Option<&str>) -> FetchOptions {
        FetchOptions {
            accept: accept.map(str::to_string),
            basic_auth: self.upstream_auth(),
            timeout: Some(self.context.artifact_timeout),
            range: None,
        }
    }

    async fn handle_tags(&self, image: &str) -> Result<MirrorResponse> {
        let cache_key = format!("tags:{image}");
        if let Some(hit) = self.context.cached(&cache_key).await {
            return Ok(MirrorResponse::ok(hit.bytes, "application/json").hit());
        }

        let url = format!("{}/v2/{image}/tags/list", self.context.upstream_base().await);
        let response = self.context.fetch(&url, self.fetch_options(None)).await?;
        self.context
            .store_cache(&cache_key, &response.bytes, Some("application/json"), self.context.ttl())
            .await;
        Ok(MirrorResponse::ok(response.bytes.clone(), "application/json"))
    }

    async fn handle_manifest(&self, image: &str, reference: &str) -> Result<MirrorResponse> {
        let cache_key = format!("manifest:{image}:{reference}");
        if let Some(hit) = self.context.cached(&cache_key).await {
            let digest = content_digest(&hit.bytes);
            return Ok(MirrorResponse::ok(hit.bytes, MANIFEST_V2)
                .with_header("Docker-Content-Digest", digest)
                .hit());
        }

        let url = format!(
            "{}/v2/{image}/manifests/{reference}",
            self.context.upstream_base().await
        );
        let response = self
            .context
            .fetch(&url, self.fetch_options(Some(MANIFEST_V2)))
            .await?;
        self.context
            .store_cache(&cache_key, &response.bytes, Some(MANIFEST_V2), self.context.artifact_ttl())
            .await;

        let digest = content_digest(&response.bytes);
        Ok(MirrorResponse::ok(response.bytes.clone(), MANIFEST_V2)
            .with_header("Docker-Content-Digest", digest))
    }

    async fn handle_blob(&self, image: &str, digest: &str) -> Result<MirrorResponse> {
        let digest_hex = digest.strip_prefix("sha256:").unwrap_or(digest);
        let cache_key = format!("blob:{digest_hex}");
        let canonical = format!("sha256:{digest_hex}");

        if let Some(hit) = self.context.cached(&cache_key).await {
            return Ok(MirrorResponse::ok(hit.bytes, "application/octet-stream")
                .with_header("Docker-Content-Digest", canonical)
                .hit());
        }

        let url = format!(
            "{}/v2/{image}/blobs/sha256:{digest_hex}",
            self.context.upstream_base().await
        );
        let response = self.context.fetch(&url, self.fetch_options(None)).await?;
        self.context
            .store_cache(
                &cache_key,
                &response.bytes,
                Some("application/octet-stream"),
                self.context.artifact_ttl(),
            )
            .await;
        Ok(MirrorResponse::ok(response.bytes.clone(), "application/octet-stream")
            .with_header("Docker-Content-Digest", canonical))
    }

    fn handle_token(&self, authorization: Option<&str>) -> Result<MirrorResponse> {
        // Validate presented Basic credentials against the configured
        // upstream pair, when one exists.
        if let Some((expected_user, expected_password)) = self.upstream_auth() {
            let presented = authorization
                .and_then(|header| header.strip_prefix("Basic "))
                .and_then(|encoded| {
                    base64::engine::general_purpose::STANDARD.decode(encoded).ok()
                })
                .and_then(|raw| String::from_utf8(raw).ok())
                .and_then(|pair| {
                    pair.split_once(':').map(|(u, p)| (u.to_string(), p.to_string()))
                });
            match presented {
                Some((user, password))
                    if user == expected_user && password == expected_password => {}
                _ => return Err(CoreError::Unauthorized("invalid credentials".to_string())),
            }
        }

        let token_id = Uuid::new_v4().to_string();
        let issued_at = stockpile_model::epoch_now();
        let token = mint_token(&self.token_secret, &token_id, issued_at);

        let body = json!({
            "token": token,
            "expires_in": TOKEN_TTL_SECS,
            "issued_at": issued_at,
        });
        Ok(MirrorResponse::ok(body.to_string().into_bytes(), "application/json"))
    }
}

#[async_trait]
impl MirrorAdapter for DockerMirror {
    fn kind(&self) -> &str {
        &self.context.kind
    }

    async fn handle(&self, request: MirrorRequest<'_>) -> Result<MirrorResponse> {
        let path = request.subpath.trim_matches('/');
        let path = path.strip_prefix("v2/").unwrap_or(path);
        let path = path.trim_matches('/');

        if path == "token" {
            return self.handle_token(request.authorization);
        }
        if path.is_empty() {
            // Version check endpoint: an empty 200 signals v2 support.
            return Ok(MirrorResponse::ok(b"{}".to_vec(), "application/json"));
        }

        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        match parts.as_slice() {
            [image @ .., "tags", "list"] if !image.is_empty() => {
                self.handle_tags(&qualify(image)).await
            }
            [image @ .., "manifests", reference] if !image.is_empty() => {
                self.handle_manifest(&qualify(image), reference).await
            }
            [image @ .., "blobs", digest] if !image.is_empty() => {
                self.handle_blob(&qualify(image), digest).await
            }
            _ => Err(CoreError::bad_request(format!(
                "invalid registry path: {path}"
            ))),
        }
    }

    async fn cache_stats(&self) -> Result<CacheStats> {
        self.context.stats().await
    }
}

/// Official single-segment images live under `library/`.
fn qualify(image: &[&str]) -> String {
    if image.len() == 1 {
        format!("library/{}", image[0])
    } else {
        image.join("/")
    }
}

fn content_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex_lower(&Sha256::digest(bytes)))
}

/// Opaque local token: `<uuid>-<hmac-sha256(secret, "uuid:issued_at")[..32]>`.
fn mint_token(secret: &str, token_id: &str, issued_at: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(format!("{token_id}:{issued_at}").as_bytes());
    let signature = hex_lower(&mac.finalize().into_bytes());
    format!("{token_id}-{}", &signature[..32])
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_segment_images_are_official() {
        assert_eq!(qualify(&["ubuntu"]), "library/ubuntu");
        assert_eq!(qualify(&["grafana", "grafana"]), "grafana/grafana");
    }

    #[test]
    fn digest_matches_sha256_of_body() {
        let digest = content_digest(b"layer-bytes");
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), "sha256:".len() + 64);
        // Stable across calls.
        assert_eq!(digest, content_digest(b"layer-bytes"));
    }

    #[test]
    fn minted_tokens_are_scoped_to_secret_and_time() {
        let a = mint_token("secret", "id", 100);
        let b = mint_token("secret", "id", 100);
        let c = mint_token("other", "id", 100);
        let d = mint_token("secret", "id", 101);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        // uuid + '-' + 32 hex chars.
        assert_eq!(a.rsplit('-').next().unwrap().len(), 32);
    }
}
