//! Repository descriptors and the external collaborators that produce
//! and authenticate them.
//!
//! Provider-specific discovery (GraphQL/REST pagination, auth flows)
//! lives outside this crate; each provider is modeled here only as an
//! opaque [`RepositorySource`] that yields descriptors, and a
//! [`SetupRepo`] callback that attaches an authenticated clone URL to
//! one descriptor immediately before it is processed.

use std::path::PathBuf;

/// An immutable snapshot of one repository as seen by a provider.
///
/// A descriptor is populated once by a [`RepositorySource`] and is
/// never mutated afterwards except for `authenticated_clone_url`,
/// which [`SetupRepo`] fills in just before the pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDescriptor {
    /// Local repository name, e.g. `"repovault"`.
    pub name: String,
    /// Owning user or organization.
    pub owner: String,
    /// Forward-slash path such as `"owner/repo"`. Always begins with
    /// `owner` (or is equal to it).
    pub path_with_namespace: String,
    /// Hosting domain, used as the first path segment under the backup
    /// root, e.g. `"github.com"`.
    pub domain: String,
    /// Unauthenticated HTTPS clone URL.
    pub clone_url: String,
    /// HTTPS clone URL with an embedded token or basic-auth credentials.
    /// Populated by [`SetupRepo`] before the pipeline consumes it.
    pub authenticated_clone_url: Option<String>,
}

impl RepositoryDescriptor {
    /// The URL the pipeline should clone from: the authenticated URL if
    /// one has been attached, otherwise the plain clone URL.
    #[must_use]
    pub fn effective_clone_url(&self) -> &str {
        self.authenticated_clone_url
            .as_deref()
            .unwrap_or(&self.clone_url)
    }

    /// The directory under a backup root that holds this repository's
    /// durable artifacts: `<domain>/<path_with_namespace>`.
    #[must_use]
    pub fn store_subpath(&self) -> PathBuf {
        PathBuf::from(&self.domain).join(&self.path_with_namespace)
    }
}

/// Produces the set of repositories a provider knows the caller can
/// access. Implementations live outside this crate (GitHub, GitLab,
/// Gitea, Bitbucket, Azure DevOps, sourcehut, ...); this crate only
/// consumes the trait.
pub trait RepositorySource: Send + Sync {
    /// A human-readable name for the provider, used in logs and result
    /// records (e.g. `"github"`).
    fn provider_name(&self) -> &str;

    /// Enumerate every repository this source's credentials can see.
    ///
    /// # Errors
    ///
    /// Returns an error if enumeration fails outright; a partial list is
    /// never produced to avoid skipping repositories silently.
    fn list_repositories(&self) -> Result<Vec<RepositoryDescriptor>, String>;
}

/// Populates `authenticated_clone_url` on a descriptor, e.g. by
/// embedding a bearer token or exchanging one for short-lived
/// credentials. May block on a network round trip.
pub trait SetupRepo: Send + Sync {
    /// Mutate `descriptor` in place, setting `authenticated_clone_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials cannot be obtained or attached.
    fn setup(&self, descriptor: &mut RepositoryDescriptor) -> Result<(), String>;
}
