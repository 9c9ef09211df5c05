//! Page composition: link batch → Markdown document → HTML.
//!
//! Link and page templates are minijinja templates, either built in or read
//! from the paths named in `[template]`. The composed Markdown goes through a
//! [`MarkupTransform`]; [`Passthrough`] serves the intermediate Markdown as is.

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use comrak::options::Options;
use minijinja::{Environment, context};
use thiserror::Error;
use tracing::{info, warn};

use crate::{config::Settings, domain::link::Link};

pub const DEFAULT_LINK_TEMPLATE: &str = "## [{{ title }}]({{ url }})\n\n{{ description }}\n{% if date %}\n*{{ date }}*\n{% endif %}";
pub const DEFAULT_PAGE_TEMPLATE: &str = "# {{ title }}\n\n{% if header %}{{ header }}\n\n{% endif %}{{ body }}\n\n<hr>\n\n{{ footer }}\n\n{{ additional_footer }}\n";
pub const DEFAULT_LINK_SEPARATOR: &str = "\n\n<hr>\n\n";
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

const LINK_TEMPLATE_NAME: &str = "link.md";
const PAGE_TEMPLATE_NAME: &str = "page.md";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),
    #[error("failed to read `{}`: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Opaque Markdown → output transform.
pub trait MarkupTransform: Send + Sync {
    fn transform(&self, markdown: &str) -> String;
}

/// CommonMark/GFM to HTML through comrak, raw HTML allowed through.
pub struct ComrakTransform {
    options: Options<'static>,
}

impl ComrakTransform {
    pub fn new() -> Self {
        let mut options = Options::default();
        options.extension.strikethrough = true;
        options.extension.table = true;
        options.extension.autolink = true;
        options.extension.tagfilter = false;
        options.render.r#unsafe = true;
        Self { options }
    }
}

impl Default for ComrakTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkupTransform for ComrakTransform {
    fn transform(&self, markdown: &str) -> String {
        comrak::markdown_to_html(markdown, &self.options)
    }
}

pub struct Passthrough;

impl MarkupTransform for Passthrough {
    fn transform(&self, markdown: &str) -> String {
        markdown.to_string()
    }
}

/// Template sources, built-in unless overridden.
#[derive(Debug, Clone)]
pub struct TemplateSources {
    pub link: String,
    pub page: String,
    pub separator: String,
}

impl Default for TemplateSources {
    fn default() -> Self {
        Self {
            link: DEFAULT_LINK_TEMPLATE.to_string(),
            page: DEFAULT_PAGE_TEMPLATE.to_string(),
            separator: DEFAULT_LINK_SEPARATOR.to_string(),
        }
    }
}

/// Everything a [`Renderer`] needs, already resolved from configuration.
#[derive(Debug, Clone)]
pub struct RendererOptions {
    pub site_title: String,
    pub base_url: String,
    pub links_per_page: usize,
    /// strftime pattern; empty omits publication dates.
    pub time_format: String,
    pub header: String,
    pub additional_footer: String,
    pub templates: TemplateSources,
    pub as_html: bool,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            site_title: "linkroll".to_string(),
            base_url: "http://localhost:3000".to_string(),
            links_per_page: 10,
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            header: String::new(),
            additional_footer: String::new(),
            templates: TemplateSources::default(),
            as_html: true,
        }
    }
}

impl RendererOptions {
    /// Resolve options from settings, reading every configured file.
    pub fn from_settings(settings: &Settings) -> Result<Self, RenderError> {
        let template = &settings.template;
        let defaults = TemplateSources::default();
        let templates = TemplateSources {
            link: read_or(template.link.as_deref(), defaults.link)?,
            page: read_or(template.page.as_deref(), defaults.page)?,
            separator: read_or(template.link_separator.as_deref(), defaults.separator)?,
        };

        Ok(Self {
            site_title: settings.html.title.clone(),
            base_url: settings.server.url.clone(),
            links_per_page: settings.html.link_per_page.get(),
            time_format: template.time_format.clone(),
            header: read_or(settings.html.additional_header.as_deref(), String::new())?,
            additional_footer: read_or(settings.html.additional_footer.as_deref(), String::new())?,
            templates,
            as_html: settings.html.as_html,
        })
    }
}

fn read_or(path: Option<&Path>, fallback: String) -> Result<String, RenderError> {
    match path {
        Some(path) => fs::read_to_string(path).map_err(|source| RenderError::Read {
            path: path.to_path_buf(),
            source,
        }),
        None => Ok(fallback),
    }
}

pub struct Renderer {
    env: Environment<'static>,
    separator: String,
    site_title: String,
    base_url: String,
    links_per_page: usize,
    time_format: String,
    header: String,
    additional_footer: String,
    transform: Box<dyn MarkupTransform>,
}

impl Renderer {
    pub fn new(options: RendererOptions) -> Result<Self, RenderError> {
        let transform: Box<dyn MarkupTransform> = if options.as_html {
            Box::new(ComrakTransform::new())
        } else {
            Box::new(Passthrough)
        };
        Self::with_transform(options, transform)
    }

    pub fn with_transform(
        options: RendererOptions,
        transform: Box<dyn MarkupTransform>,
    ) -> Result<Self, RenderError> {
        let mut env = Environment::new();
        env.add_template_owned(LINK_TEMPLATE_NAME, options.templates.link)?;
        env.add_template_owned(PAGE_TEMPLATE_NAME, options.templates.page)?;

        Ok(Self {
            env,
            separator: options.templates.separator,
            site_title: options.site_title,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            links_per_page: options.links_per_page,
            time_format: options.time_format,
            header: options.header,
            additional_footer: options.additional_footer,
            transform,
        })
    }

    pub fn links_per_page(&self) -> usize {
        self.links_per_page
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL of page `number`.
    pub fn page_url(&self, number: u32) -> String {
        format!("{}/{number}", self.base_url)
    }

    /// Full page, transformed to the output format.
    pub fn render_page(&self, page: u32, links: &[Link]) -> Result<String, RenderError> {
        let markdown = self.compose(page, links)?;
        let output = self.transform.transform(&markdown);
        info!(
            target = "linkroll::render",
            op = "render_page",
            page,
            links = links.len(),
            "Page generated"
        );
        Ok(output)
    }

    /// The intermediate Markdown document of a page.
    pub fn compose(&self, page: u32, links: &[Link]) -> Result<String, RenderError> {
        let link_template = self.env.get_template(LINK_TEMPLATE_NAME)?;
        let fragments = links
            .iter()
            .map(|link| {
                link_template.render(context! {
                    title => &link.title,
                    url => &link.url,
                    description => &link.description,
                    date => self.format_date(link.publication_date).unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let body = fragments.join(&self.separator);
        let page_template = self.env.get_template(PAGE_TEMPLATE_NAME)?;
        let document = page_template.render(context! {
            title => &self.site_title,
            header => &self.header,
            body => &body,
            footer => self.footer(page, links.len()),
            additional_footer => &self.additional_footer,
            page => page,
        })?;
        Ok(document)
    }

    /// Navigation line: previous page from page 2 on, next page only when
    /// this page is full.
    pub fn footer(&self, page: u32, link_count: usize) -> String {
        let mut parts = Vec::with_capacity(2);
        if page > 1 {
            parts.push(format!("[prev]({})", self.page_url(page - 1)));
        }
        if link_count == self.links_per_page {
            parts.push(format!("[next]({})", self.page_url(page.saturating_add(1))));
        }
        parts.join(" || ")
    }

    /// Formatted publication date, or `None` when dates are disabled, the
    /// timestamp is unset, or the pattern is invalid.
    pub fn format_date(&self, timestamp: i64) -> Option<String> {
        if self.time_format.is_empty() || timestamp <= 0 {
            return None;
        }
        let when: DateTime<Utc> = DateTime::from_timestamp(timestamp, 0)?;
        let mut out = String::new();
        if write!(out, "{}", when.format(&self.time_format)).is_err() {
            warn!(
                target = "linkroll::render",
                op = "format_date",
                time_format = %self.time_format,
                "Invalid time format; omitting publication date"
            );
            return None;
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(count: u32) -> Vec<Link> {
        (1..=count)
            .map(|n| {
                Link::new(
                    format!("title {n}"),
                    format!("description {n}"),
                    format!("https://example.org/{n}"),
                    0,
                )
            })
            .collect()
    }

    fn renderer(per_page: usize) -> Renderer {
        Renderer::new(RendererOptions {
            links_per_page: per_page,
            base_url: "https://links.example/".to_string(),
            site_title: "My links".to_string(),
            ..Default::default()
        })
        .expect("renderer builds")
    }

    #[test]
    fn footer_links_depend_on_position_and_fill() {
        let renderer = renderer(2);
        assert_eq!(
            renderer.footer(1, 2),
            "[next](https://links.example/2)"
        );
        assert_eq!(
            renderer.footer(2, 2),
            "[prev](https://links.example/1) || [next](https://links.example/3)"
        );
        assert_eq!(renderer.footer(2, 1), "[prev](https://links.example/1)");
        assert_eq!(renderer.footer(1, 1), "");
    }

    #[test]
    fn composed_markdown_lists_links_with_separators() {
        let renderer = renderer(2);
        let markdown = renderer.compose(1, &links(2)).expect("composes");

        assert!(markdown.starts_with("# My links"));
        assert!(markdown.contains("## [title 1](https://example.org/1)"));
        assert!(markdown.contains("description 2"));
        assert_eq!(markdown.matches("<hr>").count(), 2);
        assert!(markdown.contains("[next](https://links.example/2)"));
    }

    #[test]
    fn html_output_turns_links_into_anchors() {
        let renderer = renderer(2);
        let html = renderer.render_page(2, &links(1)).expect("renders");

        assert!(html.contains("<h1>My links</h1>"));
        assert!(html.contains(r#"<a href="https://example.org/1">title 1</a>"#));
        assert!(html.contains(r#"<a href="https://links.example/1">prev</a>"#));
        assert!(!html.contains(">next</a>"));
    }

    #[test]
    fn passthrough_keeps_markdown() {
        let renderer = Renderer::new(RendererOptions {
            as_html: false,
            ..Default::default()
        })
        .expect("renderer builds");
        let output = renderer.render_page(1, &links(1)).expect("renders");
        assert!(output.contains("## [title 1](https://example.org/1)"));
    }

    #[test]
    fn dates_are_formatted_or_omitted() {
        let renderer = renderer(10);
        assert_eq!(
            renderer.format_date(1_700_000_000).as_deref(),
            Some("2023-11-14 22:13")
        );
        assert_eq!(renderer.format_date(0), None);

        let no_dates = Renderer::new(RendererOptions {
            time_format: String::new(),
            ..Default::default()
        })
        .expect("renderer builds");
        assert_eq!(no_dates.format_date(1_700_000_000), None);
    }

    #[test]
    fn custom_templates_are_used() {
        let renderer = Renderer::new(RendererOptions {
            templates: TemplateSources {
                link: "* {{ title }} <{{ url }}>".to_string(),
                page: "{{ body }}|{{ footer }}".to_string(),
                separator: "\n".to_string(),
            },
            links_per_page: 5,
            as_html: false,
            ..Default::default()
        })
        .expect("renderer builds");

        let output = renderer.render_page(1, &links(2)).expect("renders");
        assert_eq!(
            output,
            "* title 1 <https://example.org/1>\n* title 2 <https://example.org/2>|"
        );
    }

    #[test]
    fn broken_template_is_rejected_up_front() {
        let result = Renderer::new(RendererOptions {
            templates: TemplateSources {
                link: "{% if %}".to_string(),
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(matches!(result, Err(RenderError::Template(_))));
    }
}
