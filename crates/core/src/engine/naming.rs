//! File names for downloaded images.

use std::path::Path;

use reqwest::Url;

use super::types::GeneratedImage;
use super::config::GRID_SIZE;

const MAX_SLUG_CHARS: usize = 50;

/// File-system friendly form of a prompt.
///
/// Drops tokens that are absolute URLs, joins the rest with `_`, keeps only
/// letters, digits and underscores, and truncates to 50 characters.
pub fn slugify(prompt: &str) -> String {
    let joined = prompt
        .split(' ')
        .filter(|token| !token.is_empty() && Url::parse(token).is_err())
        .collect::<Vec<_>>()
        .join("_");

    joined
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '_')
        .map(|c| if c == ' ' { '_' } else { c })
        .take(MAX_SLUG_CHARS)
        .collect()
}

/// `{slug}_{prompt_index:05}_{image_index:02}{ext}`
pub fn file_name(prompt: &str, prompt_index: usize, image_index: usize, ext: &str) -> String {
    format!(
        "{}_{:05}_{:02}{}",
        slugify(prompt),
        prompt_index,
        image_index,
        ext
    )
}

/// Names of the four quadrants of a grid starting at `image_index`.
pub fn file_names(prompt: &str, prompt_index: usize, image_index: usize, ext: &str) -> Vec<String> {
    (image_index..image_index + GRID_SIZE)
        .map(|index| file_name(prompt, prompt_index, index, ext))
        .collect()
}

/// Extension of the URL path including the dot, or empty.
pub fn extension_of(url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    Path::new(&path)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

impl GeneratedImage {
    pub fn file_name(&self) -> String {
        file_name(
            &self.prompt,
            self.prompt_index,
            self.image_index,
            &extension_of(&self.url),
        )
    }

    pub fn file_names(&self) -> Vec<String> {
        file_names(
            &self.prompt,
            self.prompt_index,
            self.image_index,
            &extension_of(&self.url),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_drops_urls() {
        assert_eq!(
            file_name("https://x.com/y test bar foo", 123, 3, ".png"),
            "test_bar_foo_00123_03.png"
        );
    }

    #[test]
    fn test_file_names_four_consecutive() {
        let names = file_names("https://x.com/y test bar foo", 123, 7, ".png");
        assert_eq!(
            names,
            vec![
                "test_bar_foo_00123_07.png",
                "test_bar_foo_00123_08.png",
                "test_bar_foo_00123_09.png",
                "test_bar_foo_00123_10.png",
            ]
        );
    }

    #[test]
    fn test_slugify_strips_punctuation() {
        assert_eq!(slugify("a cat, --ar 3:2!"), "a_cat_ar_32");
        assert_eq!(slugify("  double  space "), "double_space");
    }

    #[test]
    fn test_slugify_keeps_unicode_letters() {
        assert_eq!(slugify("café über 東京"), "café_über_東京");
    }

    #[test]
    fn test_slugify_truncates_to_50_chars() {
        let long = "word ".repeat(30);
        let slug = slugify(&long);
        assert_eq!(slug.chars().count(), 50);
    }

    #[test]
    fn test_extension_ignores_query() {
        assert_eq!(
            extension_of("https://cdn.discordapp.com/a/b/grid_1.png?ex=1&is=2"),
            ".png"
        );
        assert_eq!(extension_of("https://cdn/no_extension"), "");
        assert_eq!(extension_of("local/file.webp"), ".webp");
    }

    #[test]
    fn test_generated_image_names() {
        let image = GeneratedImage {
            url: "https://cdn/x/grid.webp?size=1".into(),
            prompt: "red fox".into(),
            preview: true,
            prompt_index: 2,
            image_index: 4,
            is_last: false,
        };
        assert_eq!(image.file_name(), "red_fox_00002_04.webp");
        assert_eq!(image.file_names()[3], "red_fox_00002_07.webp");
    }
}
