//! Naming conventions of the source registry.
//!
//! The registry serves third-party packages under a path prefix
//! (`https://deno.land/x/oak@v12.0.0/mod.ts`) and the standard library
//! without one (`https://deno.land/std@0.200.0/fs/mod.ts`). [`RegistryLayout`]
//! keeps both rules in one configurable place and maps locators back to the
//! canonical specifiers stored in the graph.

use url::Url;

/// Default registry scheme.
pub const DEFAULT_SCHEME: &str = "https";
/// Default registry host.
pub const DEFAULT_HOST: &str = "deno.land";
/// Package name served without the third-party prefix.
pub const DEFAULT_STD_NAME: &str = "std";
/// Path prefix for every other package.
pub const DEFAULT_THIRD_PARTY_PREFIX: &str = "x";

/// Errors raised while building locators.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    /// The assembled locator is not a valid URL.
    #[error("Invalid locator {locator}: {source}")]
    InvalidLocator {
        /// The string that failed to parse.
        locator: String,
        /// Underlying URL parse failure.
        #[source]
        source: url::ParseError,
    },

    /// The entry path resolved outside its version, or kept a fragment.
    #[error("Locator {locator} does not stay under {root}")]
    OutsideVersion {
        /// The resolved locator.
        locator: String,
        /// The version root it had to stay under.
        root: String,
    },
}

/// Describes how package names, versions and files map onto registry URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLayout {
    /// URL scheme of entry locators.
    pub scheme: String,
    /// Registry host.
    pub host: String,
    /// Package name that is served at the registry root.
    pub std_name: String,
    /// Path prefix for all other packages; empty means none.
    pub third_party_prefix: String,
}

impl Default for RegistryLayout {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            host: DEFAULT_HOST.to_string(),
            std_name: DEFAULT_STD_NAME.to_string(),
            third_party_prefix: DEFAULT_THIRD_PARTY_PREFIX.to_string(),
        }
    }
}

impl RegistryLayout {
    /// Creates the default layout for a different host.
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Returns the specifier of a package node, e.g. `x/oak` or `std`.
    pub fn package_specifier(&self, name: &str) -> String {
        if name == self.std_name || self.third_party_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.third_party_prefix, name)
        }
    }

    /// Returns the specifier of a version node, e.g. `x/oak@v12.0.0`.
    pub fn version_specifier(&self, name: &str, version: &str) -> String {
        format!("{}@{}", self.package_specifier(name), version)
    }

    /// Builds the fully qualified locator of one entry file.
    ///
    /// # Example
    ///
    /// ```
    /// use depgraph::registry::RegistryLayout;
    ///
    /// let layout = RegistryLayout::with_host("registry.example");
    /// let url = layout.locator("foo", "1.0.0", "/mod.ts").unwrap();
    /// assert_eq!(url.as_str(), "https://registry.example/x/foo@1.0.0/mod.ts");
    ///
    /// let url = layout.locator("std", "1.0.0", "/mod.ts").unwrap();
    /// assert_eq!(url.as_str(), "https://registry.example/std@1.0.0/mod.ts");
    /// ```
    ///
    /// # Errors
    ///
    /// [`LayoutError::OutsideVersion`] if `file` resolves outside the
    /// version's root (`/../other@1.0.0/mod.ts`) or carries a fragment.
    pub fn locator(&self, name: &str, version: &str, file: &str) -> Result<Url, LayoutError> {
        let root = self.parse_locator(name, version, "/")?;
        let locator = self.parse_locator(name, version, file)?;
        if locator.fragment().is_some() || !locator.path().starts_with(root.path()) {
            return Err(LayoutError::OutsideVersion {
                locator: locator.to_string(),
                root: root.to_string(),
            });
        }
        Ok(locator)
    }

    fn parse_locator(&self, name: &str, version: &str, file: &str) -> Result<Url, LayoutError> {
        let separator = if file.starts_with('/') { "" } else { "/" };
        let raw = format!(
            "{}://{}/{}{}{}",
            self.scheme,
            self.host,
            self.version_specifier(name, version),
            separator,
            file
        );
        Url::parse(&raw).map_err(|source| LayoutError::InvalidLocator {
            locator: raw,
            source,
        })
    }

    /// Converts a locator into the canonical specifier stored in the graph.
    ///
    /// Locators on the registry host lose scheme and host
    /// (`x/foo@1.0.0/mod.ts`); other HTTP hosts keep the host
    /// (`esm.sh/react@18`); any other scheme is kept verbatim.
    pub fn specifier(&self, locator: &Url) -> String {
        let host = match (locator.scheme(), locator.host_str()) {
            ("http" | "https", Some(host)) => host,
            _ => return locator.to_string(),
        };

        let mut path = locator.path().trim_start_matches('/').to_string();
        if let Some(query) = locator.query() {
            path.push('?');
            path.push_str(query);
        }

        if host == self.host && locator.port().is_none() {
            path
        } else {
            match locator.port() {
                Some(port) => format!("{}:{}/{}", host, port, path),
                None => format!("{}/{}", host, path),
            }
        }
    }

    /// Like [`RegistryLayout::specifier`], for locators that may not parse.
    pub fn specifier_str(&self, locator: &str) -> String {
        match Url::parse(locator) {
            Ok(url) => self.specifier(&url),
            Err(_) => locator.to_string(),
        }
    }
}
