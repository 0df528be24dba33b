use url::Url;

const MARKETPLACE_HOST: &str = "marketplace.visualstudio.com";

/// Extract `publisher.extension-name` from a marketplace item URL.
/// Anything that is not a recognisable marketplace URL comes back trimmed but otherwise unchanged.
pub fn extract_package_name(input: &str) -> String {
    let trimmed = input.trim();

    if trimmed.contains('.') && !trimmed.contains("://") {
        return trimmed.to_string();
    }

    if let Ok(url) = Url::parse(trimmed) {
        if url.host_str() == Some(MARKETPLACE_HOST) && url.path() == "/items" {
            if let Some((_, item)) = url.query_pairs().find(|(key, _)| key == "itemName") {
                if !item.is_empty() {
                    return item.into_owned();
                }
            }
        }
    }

    trimmed.to_string()
}

/// One package name per non-empty line.
pub fn extract_package_names(input: &str) -> Vec<String> {
    input
        .lines()
        .map(extract_package_name)
        .filter(|name| !name.is_empty())
        .collect()
}

/// Sanitize filename to remove invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_marketplace_url() {
        assert_eq!(
            extract_package_name(
                "https://marketplace.visualstudio.com/items?itemName=ms-python.python"
            ),
            "ms-python.python"
        );
    }

    #[test]
    fn test_extract_plain_identifier() {
        assert_eq!(extract_package_name("ms-python.python"), "ms-python.python");
        assert_eq!(
            extract_package_name("  ms-python.python \t"),
            "ms-python.python"
        );
    }

    #[test]
    fn test_extract_falls_back_to_input() {
        assert_eq!(
            extract_package_name(" https://example.com/items?itemName=a.b "),
            "https://example.com/items?itemName=a.b"
        );
        assert_eq!(
            extract_package_name("https://marketplace.visualstudio.com/search?term=python"),
            "https://marketplace.visualstudio.com/search?term=python"
        );
        assert_eq!(extract_package_name("not a url"), "not a url");
    }

    #[test]
    fn test_extract_package_names() {
        let input = "ms-python.python\n\n  https://marketplace.visualstudio.com/items?itemName=esbenp.prettier-vscode\nbroken\n";
        assert_eq!(
            extract_package_names(input),
            vec!["ms-python.python", "esbenp.prettier-vscode", "broken"]
        );
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("test/file.vsix"), "test_file.vsix");
        assert_eq!(
            sanitize_filename("ms-python.python-1.0.0.vsix"),
            "ms-python.python-1.0.0.vsix"
        );
    }
}
