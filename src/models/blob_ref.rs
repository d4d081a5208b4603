//! Addresses of blobs and containers inside a storage account.
//!
//! Two URL layouts are understood:
//! - host-style, `https://{account}.blob.example.net/{container}/{blob}`, where the
//!   account is the first label of the host;
//! - path-style, `http://127.0.0.1:10000/{account}/{container}/{blob}`, used whenever
//!   the host is an IP address or `localhost` (emulators, local stores).
//!
//! Blob names may contain `/` and are kept in their URL-encoded form.

use crate::errors::{StorageError, StorageResult};
use std::fmt;
use url::{Host, Url};

/// A container within a storage account.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContainerRef {
    account_url: Url,
    account: String,
    name: String,
}

impl ContainerRef {
    /// Base URL of the owning account (always ends with `/`).
    pub fn account_url(&self) -> &Url {
        &self.account_url
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.account_url, self.name)
    }
}

/// A fully resolved blob address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlobRef {
    url: Url,
    container: ContainerRef,
    name: String,
}

impl BlobRef {
    /// Parse an absolute blob URL. Query string and fragment are dropped, so a URL
    /// that already carries a signature resolves to the bare blob address.
    pub fn parse(input: &str) -> StorageResult<Self> {
        let url = Url::parse(input).map_err(|err| StorageError::InvalidBlobUrl {
            url: input.to_string(),
            reason: err.to_string(),
        })?;
        Self::from_url(&url)
    }

    pub fn from_url(url: &Url) -> StorageResult<Self> {
        let invalid = |reason: &str| StorageError::InvalidBlobUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let host = url.host().ok_or_else(|| invalid("missing host"))?;
        let path_style = is_path_style(&host);

        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.collect())
            .unwrap_or_default();

        let (account, rest) = if path_style {
            let (account, rest) = segments
                .split_first()
                .ok_or_else(|| invalid("missing account segment"))?;
            (account.to_string(), rest)
        } else {
            let account = url
                .host_str()
                .and_then(|host| host.split('.').next())
                .unwrap_or_default()
                .to_string();
            (account, segments.as_slice())
        };

        if account.is_empty() {
            return Err(invalid("missing account name"));
        }

        let (container, blob_segments) = rest
            .split_first()
            .ok_or_else(|| invalid("missing container"))?;
        if container.is_empty() {
            return Err(invalid("missing container"));
        }

        let name = blob_segments.join("/");
        if name.is_empty() || name.ends_with('/') {
            return Err(invalid("missing blob name"));
        }

        let mut account_url = url.clone();
        account_url.set_query(None);
        account_url.set_fragment(None);
        if path_style {
            account_url.set_path(&format!("/{}/", account));
        } else {
            account_url.set_path("/");
        }

        let mut blob_url = url.clone();
        blob_url.set_query(None);
        blob_url.set_fragment(None);

        Ok(Self {
            url: blob_url,
            container: ContainerRef {
                account_url,
                account,
                name: container.to_string(),
            },
            name,
        })
    }

    /// Absolute address of the blob, without any query string.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn account(&self) -> &str {
        &self.container.account
    }

    pub fn account_url(&self) -> &Url {
        &self.container.account_url
    }

    pub fn container_name(&self) -> &str {
        &self.container.name
    }

    pub fn container(&self) -> &ContainerRef {
        &self.container
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `/{container}/{blob}`: the part of the address that does not depend on the
    /// storage account.
    pub fn relative_path(&self) -> String {
        format!("/{}/{}", self.container.name, self.name)
    }

    pub fn is_same_address(&self, other: &BlobRef) -> bool {
        self.url.as_str() == other.url.as_str()
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

fn is_path_style(host: &Host<&str>) -> bool {
    match host {
        Host::Ipv4(_) | Host::Ipv6(_) => true,
        Host::Domain(domain) => domain.eq_ignore_ascii_case("localhost"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_style_url() {
        let blob = BlobRef::parse("https://prodacct.blob.core.windows.net/media/2024/a.png")
            .expect("valid url");

        assert_eq!(blob.account(), "prodacct");
        assert_eq!(blob.container_name(), "media");
        assert_eq!(blob.name(), "2024/a.png");
        assert_eq!(blob.relative_path(), "/media/2024/a.png");
        assert_eq!(
            blob.account_url().as_str(),
            "https://prodacct.blob.core.windows.net/"
        );
    }

    #[test]
    fn parses_path_style_url() {
        let blob = BlobRef::parse("http://127.0.0.1:10000/devacct/media/a.png").expect("valid url");

        assert_eq!(blob.account(), "devacct");
        assert_eq!(blob.container_name(), "media");
        assert_eq!(blob.name(), "a.png");
        assert_eq!(blob.relative_path(), "/media/a.png");
        assert_eq!(
            blob.account_url().as_str(),
            "http://127.0.0.1:10000/devacct/"
        );
        assert_eq!(
            blob.container().to_string(),
            "http://127.0.0.1:10000/devacct/media"
        );
    }

    #[test]
    fn drops_query_and_fragment() {
        let signed = BlobRef::parse("http://localhost:10000/devacct/media/a.png?sp=r&sig=abc#x")
            .expect("valid url");
        let bare = BlobRef::parse("http://localhost:10000/devacct/media/a.png").expect("valid url");

        assert_eq!(signed, bare);
        assert!(signed.is_same_address(&bare));
        assert_eq!(signed.url().query(), None);
    }

    #[test]
    fn relative_path_ignores_account() {
        let a = BlobRef::parse("https://one.blob.example.net/media/a.png").expect("valid url");
        let b = BlobRef::parse("https://two.blob.example.net/media/a.png").expect("valid url");

        assert!(!a.is_same_address(&b));
        assert_eq!(a.relative_path(), b.relative_path());
    }

    #[test]
    fn rejects_incomplete_addresses() {
        for input in [
            "not a url",
            "https://acct.blob.example.net/",
            "https://acct.blob.example.net/media",
            "https://acct.blob.example.net/media/",
            "http://127.0.0.1:10000/devacct/media",
            "http://127.0.0.1:10000/",
        ] {
            let err = BlobRef::parse(input).expect_err(input);
            assert!(
                matches!(err, StorageError::InvalidBlobUrl { .. }),
                "unexpected error for {input}: {err:?}"
            );
        }
    }
}
