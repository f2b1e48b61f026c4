//! Tag resolution from version-control refs
//!
//! Turns a commit ref such as `refs/tags/v1.2.3` into the list of image tags
//! to publish. Numeric components keep the digit width used in the ref, so
//! `v18.06.0` yields `18`, `18.06` and `18.06.0`.

use std::fmt;

const TAG_REF_PREFIX: &str = "refs/tags/";
const HEAD_REF_PREFIX: &str = "refs/heads/";
const LATEST: &str = "latest";

/// Ordered set of tags. The first entry is the primary tag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagSet(Vec<String>);

impl TagSet {
    /// Builds a tag set, dropping blank entries.
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            tags.into_iter()
                .map(Into::into)
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        )
    }

    pub fn primary(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.clone()
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(", "))
    }
}

/// `MAJOR.MINOR.PATCH[-prerelease][+metadata]`, borrowed from the ref text.
#[derive(Debug, PartialEq, Eq)]
struct Version<'a> {
    major: &'a str,
    minor: &'a str,
    patch: &'a str,
    pre_release: Option<&'a str>,
    metadata: Option<&'a str>,
}

impl<'a> Version<'a> {
    fn parse(text: &'a str) -> Option<Self> {
        let (rest, metadata) = match text.split_once('+') {
            Some((rest, meta)) => (rest, Some(meta)),
            None => (text, None),
        };
        let (core, pre_release) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        let mut parts = core.split('.');
        let major = parts.next().filter(|p| is_numeric(p))?;
        let minor = parts.next().filter(|p| is_numeric(p))?;
        let patch = parts.next().filter(|p| is_numeric(p))?;
        if parts.next().is_some() {
            return None;
        }

        if let Some(pre) = pre_release
            && !is_identifier_list(pre)
        {
            return None;
        }
        if let Some(meta) = metadata
            && !is_identifier_list(meta)
        {
            return None;
        }

        Some(Self {
            major,
            minor,
            patch,
            pre_release,
            metadata,
        })
    }

    fn is_stable(&self) -> bool {
        self.pre_release.is_none() && self.metadata.is_none()
    }

    fn major_is_zero(&self) -> bool {
        self.major.bytes().all(|b| b == b'0')
    }
}

fn is_numeric(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

fn is_identifier_list(list: &str) -> bool {
    list.split('.').all(|id| {
        !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

fn strip_tag_prefix(git_ref: &str) -> &str {
    let stripped = git_ref.strip_prefix(TAG_REF_PREFIX).unwrap_or(git_ref);
    stripped.strip_prefix('v').unwrap_or(stripped)
}

fn strip_head_prefix(git_ref: &str) -> &str {
    git_ref.strip_prefix(HEAD_REF_PREFIX).unwrap_or(git_ref)
}

/// Suggested tags for a commit ref, without any suffix applied.
///
/// - branch refs and anything else that is not `refs/tags/*` -> `["latest"]`
/// - prerelease or build metadata -> the full version only
/// - major `0` -> `["0.m", "0.m.p"]`
/// - otherwise -> `["M", "M.m", "M.m.p"]`
///
/// A tag ref that is not a valid version also yields `["latest"]`.
pub fn default_tags(git_ref: &str) -> Vec<String> {
    if !git_ref.starts_with(TAG_REF_PREFIX) {
        return vec![LATEST.to_string()];
    }

    let text = strip_tag_prefix(git_ref);
    let Some(version) = Version::parse(text) else {
        tracing::warn!(
            "Tag ref {} is not a semantic version, falling back to '{}'",
            git_ref,
            LATEST
        );
        return vec![LATEST.to_string()];
    };

    if !version.is_stable() {
        return vec![text.to_string()];
    }

    let minor = format!("{}.{}", version.major, version.minor);
    let patch = format!("{}.{}.{}", version.major, version.minor, version.patch);
    if version.major_is_zero() {
        vec![minor, patch]
    } else {
        vec![version.major.to_string(), minor, patch]
    }
}

/// Applies a tag suffix. An empty suffix returns the tags unchanged.
///
/// A lone `latest` becomes the suffix itself; every other tag gets
/// `-<suffix>` appended.
pub fn default_tag_suffix(tags: Vec<String>, suffix: &str) -> Vec<String> {
    if suffix.is_empty() {
        return tags;
    }
    if tags.len() == 1 && tags[0] == LATEST {
        return vec![suffix.to_string()];
    }
    tags.into_iter()
        .map(|tag| format!("{}-{}", tag, suffix))
        .collect()
}

/// Resolves the tags to publish for a ref and optional suffix.
pub fn resolve_tags(git_ref: &str, suffix: &str) -> TagSet {
    TagSet::new(default_tag_suffix(default_tags(git_ref), suffix))
}

/// Whether automatic tags apply to this ref: every tag ref, and the
/// default branch. Feature branches must not overwrite `latest`.
pub fn use_default_tag(git_ref: &str, default_branch: &str) -> bool {
    if git_ref.starts_with(TAG_REF_PREFIX) {
        return true;
    }
    strip_head_prefix(git_ref) == default_branch
}

/// Automatic tags for a run, or `None` when the ref is neither a tag nor
/// the default branch.
pub fn auto_tags(git_ref: &str, suffix: &str, default_branch: &str) -> Option<TagSet> {
    if !use_default_tag(git_ref, default_branch) {
        tracing::info!("Skipping automatic tags for {}", git_ref);
        return None;
    }
    Some(resolve_tags(git_ref, suffix))
}
