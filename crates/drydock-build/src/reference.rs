//! Image reference helpers

/// Splits an image reference into name and tag.
///
/// # Examples
/// - `ghcr.io/org/app:v1.0` -> `("ghcr.io/org/app", "v1.0")`
/// - `ghcr.io/org/app` -> `("ghcr.io/org/app", "latest")`
/// - `localhost:5000/app` -> `("localhost:5000/app", "latest")`
/// - `localhost:5000/app:dev` -> `("localhost:5000/app", "dev")`
/// - `acme/app:` -> `("acme/app", "latest")`
pub fn split_image_tag(image: &str) -> (String, String) {
    if let Some(pos) = image.rfind(':') {
        let potential_tag = &image[pos + 1..];
        let potential_image = &image[..pos];

        // A slash after the colon means it belonged to registry:port
        if !potential_tag.contains('/') && !potential_image.is_empty() {
            if potential_tag.is_empty() {
                tracing::info!(
                    "No tag in image reference {}, using 'latest'",
                    image
                );
                return (potential_image.to_string(), "latest".to_string());
            }
            return (potential_image.to_string(), potential_tag.to_string());
        }
    }

    (image.to_string(), "latest".to_string())
}

/// Registry host of an image reference.
///
/// # Examples
/// - `ghcr.io/org/app:tag` -> `ghcr.io`
/// - `myuser/app:tag` -> `docker.io`
/// - `localhost:5000/app` -> `localhost:5000`
pub fn extract_registry(image: &str) -> String {
    let parts: Vec<&str> = image.split('/').collect();

    if parts.len() >= 2 {
        let first = parts[0];
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return first.to_string();
        }
    }

    "docker.io".to_string()
}

/// Image reference reported by `docker load`.
///
/// Accepts both `Loaded image: repo:tag` and `Loaded image ID: sha256:...`;
/// the last reported image wins.
pub fn parse_loaded_image(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            line.strip_prefix("Loaded image ID:")
                .or_else(|| line.strip_prefix("Loaded image:"))
                .map(str::trim)
                .filter(|image| !image.is_empty())
                .map(str::to_string)
        })
        .last()
}

/// Digest part of a `repo@sha256:...` repo-digest line.
pub fn parse_repo_digest(output: &str) -> Option<String> {
    let line = output.trim().trim_matches('\'').trim();
    line.split_once('@')
        .map(|(_, digest)| digest.trim().to_string())
        .filter(|digest| !digest.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_image_tag_with_tag() {
        let (image, tag) = split_image_tag("ghcr.io/org/app:v1.0");
        assert_eq!(image, "ghcr.io/org/app");
        assert_eq!(tag, "v1.0");
    }

    #[test]
    fn test_split_image_tag_without_tag() {
        let (image, tag) = split_image_tag("ghcr.io/org/app");
        assert_eq!(image, "ghcr.io/org/app");
        assert_eq!(tag, "latest");
    }

    #[test]
    fn test_split_image_tag_with_port() {
        let (image, tag) = split_image_tag("localhost:5000/app");
        assert_eq!(image, "localhost:5000/app");
        assert_eq!(tag, "latest");
    }

    #[test]
    fn test_split_image_tag_with_port_and_tag() {
        let (image, tag) = split_image_tag("localhost:5000/app:dev");
        assert_eq!(image, "localhost:5000/app");
        assert_eq!(tag, "dev");
    }

    #[test]
    fn test_split_image_tag_numeric_tag() {
        let (image, tag) = split_image_tag("acme/app:2024");
        assert_eq!(image, "acme/app");
        assert_eq!(tag, "2024");
    }

    #[test]
    fn test_split_image_tag_empty_tag() {
        let (image, tag) = split_image_tag("acme/app:");
        assert_eq!(image, "acme/app");
        assert_eq!(tag, "latest");
    }

    #[test]
    fn test_extract_registry() {
        assert_eq!(extract_registry("ghcr.io/org/app:v1.0"), "ghcr.io");
        assert_eq!(extract_registry("myuser/app:latest"), "docker.io");
        assert_eq!(extract_registry("nginx"), "docker.io");
        assert_eq!(extract_registry("localhost:5000/myapp"), "localhost:5000");
        assert_eq!(
            extract_registry("123456789.dkr.ecr.ap-northeast-1.amazonaws.com/app"),
            "123456789.dkr.ecr.ap-northeast-1.amazonaws.com"
        );
    }

    #[test]
    fn test_parse_loaded_image() {
        let output = "abc123: Loading layer  1.2MB/1.2MB\nLoaded image: acme/app:build\n";
        assert_eq!(parse_loaded_image(output).as_deref(), Some("acme/app:build"));

        let output = "Loaded image ID: sha256:0123abcd\n";
        assert_eq!(
            parse_loaded_image(output).as_deref(),
            Some("sha256:0123abcd")
        );

        assert_eq!(parse_loaded_image("open /tmp/x.tar: no such file"), None);
        assert_eq!(parse_loaded_image("Loaded image: \n"), None);
    }

    #[test]
    fn test_parse_repo_digest() {
        assert_eq!(
            parse_repo_digest("'acme/app@sha256:deadbeef'\n").as_deref(),
            Some("sha256:deadbeef")
        );
        assert_eq!(
            parse_repo_digest("acme/app@sha256:cafe").as_deref(),
            Some("sha256:cafe")
        );
        assert_eq!(parse_repo_digest("''"), None);
        assert_eq!(parse_repo_digest("acme/app@"), None);
    }
}
