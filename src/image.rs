//! # Image References and Intermediate Images
//!
//! Two concerns live here:
//!
//! - **Reference parsing**: `[registry/]repository[:tag|@digest]` into an
//!   [`ImageRef`].
//! - **Intermediate images**: on-demand toolchain images built from an
//!   embedded Dockerfile and named by the SHA-256 of its bytes.
//!
//! ## Content-Addressed Tags
//!
//! ```text
//!   Dockerfile bytes ──sha256──► checksum
//!                                   │
//!   registry/name:checksum ◄────────┘
//! ```
//!
//! The tag is a pure function of the recipe. Identical bytes give the same
//! tag and the build is skipped; any byte change gives a new tag and a fresh
//! build. Every build step relies on this for incremental builds.

use crate::constants::{DEFAULT_REGISTRY_HOST, DEFAULT_TAG};
use crate::error::{Error, Result};
use crate::manager::{ContainerManager, drain};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

// =============================================================================
// Image References
// =============================================================================

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Everything before the last `/`; empty when absent.
    pub registry: String,
    /// Repository name after the last `/`.
    pub image: String,
    /// Tag, `latest` when absent.
    pub tag: String,
    /// Digest (`sha256:...`) when pinned.
    pub digest: Option<String>,
}

impl ImageRef {
    /// Parses an image reference.
    ///
    /// ```rust,ignore
    /// let r = ImageRef::parse("datadog/agent:7")?;
    /// assert_eq!(r.registry, "datadog");
    /// assert_eq!(r.image, "agent");
    /// assert_eq!(r.tag, "7");
    /// ```
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidImageReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if reference.is_empty() {
            return Err(invalid("empty image reference"));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }

        let (rest, digest) = match reference.split_once('@') {
            Some((rest, digest)) if !digest.is_empty() => (rest, Some(digest.to_string())),
            Some(_) => return Err(invalid("empty digest")),
            None => (reference, None),
        };

        let (registry, name) = match rest.rsplit_once('/') {
            Some((registry, name)) => (registry, name),
            None => ("", rest),
        };

        // A ':' after the last '/' separates the tag; one before it is a port.
        let (image, tag) = match name.split_once(':') {
            Some((image, tag)) if !tag.is_empty() => (image, tag),
            Some(_) => return Err(invalid("empty tag")),
            None => (name, DEFAULT_TAG),
        };

        if image.is_empty() {
            return Err(invalid("empty repository name"));
        }

        Ok(Self {
            registry: registry.to_string(),
            image: image.to_string(),
            tag: tag.to_string(),
            digest,
        })
    }

    /// Returns the registry host serving this image.
    ///
    /// The first registry segment counts as a host only when it looks like a
    /// domain (`ghcr.io`, `localhost:5000`). Otherwise it is a namespace on
    /// the default public registry.
    pub fn host(&self) -> &str {
        let first = self.registry.split('/').next().unwrap_or_default();
        if is_domain_like(first) {
            first
        } else {
            DEFAULT_REGISTRY_HOST
        }
    }

    /// Returns `registry/image` without tag or digest.
    pub fn repository(&self) -> String {
        if self.registry.is_empty() {
            self.image.clone()
        } else {
            format!("{}/{}", self.registry, self.image)
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.digest {
            Some(digest) => write!(f, "{}@{}", self.repository(), digest),
            None => write!(f, "{}:{}", self.repository(), self.tag),
        }
    }
}

fn is_domain_like(segment: &str) -> bool {
    segment == "localhost" || segment.contains('.') || segment.contains(':')
}

// =============================================================================
// Image Metadata
// =============================================================================

/// An image known to a backend.
///
/// Tagging inserts a second table entry pointing at the same image id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Name the image is keyed by.
    pub name: String,
    /// Backend image id.
    pub id: String,
    /// Resolved platform (`os/arch`).
    pub platform: Option<String>,
    /// Dockerfile the image was built from.
    pub dockerfile: Option<Vec<u8>>,
}

/// Returns the hex SHA-256 of a build recipe.
pub fn dockerfile_checksum(dockerfile: &[u8]) -> String {
    hex::encode(Sha256::digest(dockerfile))
}

// =============================================================================
// Intermediate Images
// =============================================================================

/// Result of [`IntermediateImage::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// An image with the same recipe checksum already existed.
    Hit,
    /// The image was built.
    Built,
}

/// A toolchain image built on demand from an embedded Dockerfile.
#[derive(Debug, Clone)]
pub struct IntermediateImage {
    registry: String,
    name: String,
    dockerfile: Vec<u8>,
}

impl IntermediateImage {
    pub fn new(
        registry: impl Into<String>,
        name: impl Into<String>,
        dockerfile: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            registry: registry.into(),
            name: name.into(),
            dockerfile: dockerfile.into(),
        }
    }

    /// Returns the recipe checksum.
    pub fn checksum(&self) -> String {
        dockerfile_checksum(&self.dockerfile)
    }

    /// Returns `registry/name:checksum`.
    pub fn tag(&self) -> String {
        format!(
            "{}/{}:{}",
            self.registry.trim_end_matches('/'),
            self.name,
            self.checksum()
        )
    }

    /// Returns the recipe bytes.
    pub fn dockerfile(&self) -> &[u8] {
        &self.dockerfile
    }

    /// Builds the image unless one with the same tag already exists.
    pub async fn ensure(
        &self,
        manager: &dyn ContainerManager,
        platform: Option<&str>,
    ) -> Result<CacheOutcome> {
        let tag = self.tag();
        match manager.inspect_image(&tag).await {
            Ok(_) => {
                info!("intermediate image {} cached, skipping build", tag);
                return Ok(CacheOutcome::Hit);
            }
            Err(e) if e.is_not_found() => {
                debug!("intermediate image {} missing: building", tag);
            }
            Err(e) => return Err(e),
        }

        let logs = manager.build_image(&self.dockerfile, &tag, platform).await?;
        let output = drain(logs).await?;
        debug!(
            "build of {} produced {} bytes of output",
            tag,
            output.len()
        );

        info!("built intermediate image {}", tag);
        Ok(CacheOutcome::Built)
    }
}
