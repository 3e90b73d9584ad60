//! Static HTML gallery views of a job.

use std::fmt::Write;
use std::path::Path;
use std::time::Duration;

use super::types::{Job, JobImage};

/// Where gallery images are loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GallerySource {
    /// Downloaded files under `images/`, optionally through thumbnails.
    Local { thumbnail: bool },
    /// Upstream URLs.
    Remote,
}

const STYLE: &str = r#"div.gallery {
  margin: 5px;
  border: 1px solid #ccc;
  float: left;
  width: 128px;
}
div.gallery:hover {
  border: 1px solid #777;
}
div.gallery img {
  width: 100%;
  height: auto;
}
div.gallery input {
  margin-top: 5px;
  width: 100%;
}"#;

/// Escape text for HTML content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// `1h02m03s` style duration.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{:02}m{:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m{:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

fn file_stem(file: &str) -> &str {
    Path::new(file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file)
}

/// Link target and image source of one gallery tile.
fn tile(image: &JobImage, source: GallerySource) -> (String, String) {
    match (source, image.file.as_deref()) {
        (GallerySource::Local { thumbnail }, Some(file)) => {
            let href = format!("images/{}", file);
            let src = if thumbnail {
                format!("images/_thumbnails/{}.jpg", file_stem(file))
            } else {
                href.clone()
            };
            (href, src)
        }
        _ => (image.url.clone(), image.url.clone()),
    }
}

/// Render the gallery page of `job`.
pub fn render_gallery(job: &Job, source: GallerySource) -> String {
    let mut html = String::new();
    let _ = writeln!(html, "<html>\n<head>\n<meta charset=\"utf-8\">");
    let _ = writeln!(html, "<title>Album {}</title>", escape_html(&job.id));
    let _ = writeln!(html, "<style>\n{}\n</style>\n</head>\n<body>\n", STYLE);
    let _ = writeln!(html, "<h1>Album {}</h1>", escape_html(&job.id));
    let _ = writeln!(
        html,
        "<p>{} {}% {}, elapsed: {}</p>",
        job.status,
        job.percentage as u32,
        job.updated_at.format("%Y-%m-%d %H:%M:%S"),
        format_elapsed(job.elapsed())
    );

    for image in &job.images {
        let (href, src) = tile(image, source);
        let _ = writeln!(
            html,
            "<div class=\"gallery\">\n  <a target=\"_blank\" href=\"{}\">\n    <img src=\"{}\">\n  </a>\n  <input type=\"text\" value=\"{}\">\n</div>",
            escape_html(&href),
            escape_html(&src),
            escape_html(&image.prompt)
        );
    }

    html.push_str("\n</body>\n</html>\n");
    html
}
