//reference:https://github.com/frewsxcv/rgis/blob/main/rgis-network/src/lib.rs
use bytes::Bytes;
use houtu_jobs::AsyncReturn;
use reqwest::Url;

use crate::TilesetError;

/// Source of manifests and tile payloads.
pub trait ResourceFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> AsyncReturn<Result<Bytes, TilesetError>>;
}

/// Fetches over HTTP(S) with reqwest.
#[derive(Debug, Default, Clone)]
pub struct ReqwestFetcher;

impl ResourceFetcher for ReqwestFetcher {
    fn fetch(&self, url: &str) -> AsyncReturn<Result<Bytes, TilesetError>> {
        let url = url.to_string();
        Box::pin(async move {
            let fetch = async {
                let response = reqwest::get(url.as_str())
                    .await
                    .map_err(|e| TilesetError::network(&url, e))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(TilesetError::network(&url, format!("HTTP status {}", status)));
                }
                response
                    .bytes()
                    .await
                    .map_err(|e| TilesetError::network(&url, e))
            };
            #[cfg(not(target_arch = "wasm32"))]
            {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| TilesetError::network(&url, e))?;
                runtime.block_on(fetch)
            }
            #[cfg(target_arch = "wasm32")]
            {
                fetch.await
            }
        })
    }
}

/// Resolves `reference` against the manifest at `base`. Absolute references
/// are kept. The query of `base` is carried over to references without one.
pub fn resolve_url(base: &str, reference: &str) -> String {
    if let Ok(absolute) = Url::parse(reference) {
        return absolute.into();
    }
    let Ok(base_url) = Url::parse(base) else {
        return join_path(base, reference);
    };
    match base_url.join(reference) {
        Ok(mut resolved) => {
            if resolved.query().is_none() {
                resolved.set_query(base_url.query());
            }
            resolved.into()
        }
        Err(_) => join_path(base, reference),
    }
}

/// Fallback for bases that are not urls, such as relative file paths.
fn join_path(base: &str, reference: &str) -> String {
    if reference.starts_with('/') {
        return reference.to_string();
    }
    let path = base.split(['?', '#']).next().unwrap_or(base);
    match path.rfind('/') {
        Some(index) => format!("{}{}", path.get(..=index).unwrap_or_default(), reference),
        None => reference.to_string(),
    }
}
