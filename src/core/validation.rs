//! Share validation strategies.
//!
//! A strategy asks the backend whether a share path is genuine. The strategy
//! is chosen once when the service descriptor is built; requests only match
//! on the enum.
use hyper::StatusCode;
use url::form_urlencoded;

use crate::{
    core::registry::BackendUrl,
    ports::http_client::{HttpClient, HttpClientResult},
};

/// Endpoint the API-key probe queries for share metadata.
pub const SHARE_KEY_ENDPOINT: &str = "/api/shared-links/me";
/// Query parameter carrying the share key.
pub const SHARE_KEY_PARAM: &str = "key";

/// Backend verdict on one share path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareValidation {
    pub valid: bool,
    pub status: StatusCode,
}

impl ShareValidation {
    fn from_status(status: StatusCode) -> Self {
        Self {
            valid: status == StatusCode::OK,
            status,
        }
    }
}

/// How a service's share paths are confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationStrategy {
    /// `HEAD backend + share_path`; 200 means the share exists.
    HeadProbe,
    /// Extract the key after `prefix` and ask a fixed API endpoint about it.
    ApiKeyProbe {
        prefix: String,
        endpoint: String,
        param: String,
    },
}

impl ValidationStrategy {
    /// Map a configured method name onto a strategy. Missing or unknown names
    /// fall back to [`ValidationStrategy::HeadProbe`].
    pub fn from_method(method: Option<&str>, share_paths: &[String]) -> Self {
        match method {
            None | Some("head") => Self::HeadProbe,
            Some("api_key" | "immichApi" | "immich_api") => Self::ApiKeyProbe {
                prefix: share_paths
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "/share/".to_string()),
                endpoint: SHARE_KEY_ENDPOINT.to_string(),
                param: SHARE_KEY_PARAM.to_string(),
            },
            Some(other) => {
                tracing::warn!(
                    "Unknown validation method '{}', falling back to HEAD probe",
                    other
                );
                Self::HeadProbe
            }
        }
    }

    /// Ask `backend` whether `share_path` is a live share.
    ///
    /// A 404 or 401 from the backend is an ordinary `valid: false`; only a
    /// transport failure (connect, DNS, timeout) comes back as `Err`.
    pub async fn validate(
        &self,
        client: &dyn HttpClient,
        backend: &BackendUrl,
        share_path: &str,
    ) -> HttpClientResult<ShareValidation> {
        match self {
            Self::HeadProbe => {
                let status = client.probe(&backend.join(share_path)).await?;
                Ok(ShareValidation::from_status(status))
            }
            Self::ApiKeyProbe {
                prefix,
                endpoint,
                param,
            } => {
                let Some(key) = extract_share_key(share_path, prefix) else {
                    tracing::debug!("No share key in path {}", share_path);
                    return Ok(ShareValidation {
                        valid: false,
                        status: StatusCode::BAD_REQUEST,
                    });
                };
                let query: String = form_urlencoded::Serializer::new(String::new())
                    .append_pair(param, key)
                    .finish();
                let status = client
                    .probe(&backend.join(&format!("{endpoint}?{query}")))
                    .await?;
                Ok(ShareValidation::from_status(status))
            }
        }
    }
}

/// The opaque key in `/prefix/<key>[/...][?...]`, if any.
pub fn extract_share_key<'a>(share_path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = share_path.strip_prefix(prefix)?;
    let end = rest.find(['/', '?']).unwrap_or(rest.len());
    let key = &rest[..end];
    (!key.is_empty()).then_some(key)
}
