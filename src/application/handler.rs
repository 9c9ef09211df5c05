//! Request entry point: diagnostic commands or a rendered page.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use tracing::{info, warn};

use crate::{
    application::{
        error::AppError,
        pagination::Paginator,
        publishing::{PublishError, StoreAggregator},
        render::{Renderer, RendererOptions},
        repos::LinkSource,
    },
    cache::{PageCache, lock::mutex_lock},
    config::Settings,
    domain::link::Link,
};

const SOURCE: &str = "application::handler";

/// Served for page numbers below 1.
pub const OUT_OF_RANGE: &str =
    r#"<p class="out-of-range">Nothing has been published that far back.</p>"#;

/// Markup sending the client to `url`.
pub fn redirection(url: &str) -> String {
    format!(r#"<meta http-equiv="refresh" content="0; url={url}" />"#)
}

/// A diagnostic command named by the first path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    Cache,
    Stack,
    Push,
    Move,
    Print,
}

impl CommandKind {
    fn parse(segment: &str) -> Option<Self> {
        match segment {
            "cache" => Some(Self::Cache),
            "stack" => Some(Self::Stack),
            "push" => Some(Self::Push),
            "move" => Some(Self::Move),
            "print" => Some(Self::Print),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HandlerOptions {
    pub commands: bool,
    pub seed_when_empty: bool,
}

/// Long-lived site state shared by every request: the stores, the page
/// cache and the rendering pipeline, built once from settings.
pub struct RequestHandler {
    store: Mutex<StoreAggregator>,
    cache: PageCache,
    paginator: Paginator,
    renderer: Renderer,
    options: HandlerOptions,
    last_id: AtomicU64,
}

impl RequestHandler {
    pub fn new(
        store: StoreAggregator,
        cache: PageCache,
        paginator: Paginator,
        renderer: Renderer,
        options: HandlerOptions,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            cache,
            paginator,
            renderer,
            options,
            last_id: AtomicU64::new(0),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        let store = StoreAggregator::from_settings(settings)?;
        let renderer = Renderer::new(RendererOptions::from_settings(settings)?)?;

        Ok(Self::new(
            store,
            PageCache::new(settings.server.cache_size),
            Paginator::new(settings.html.link_per_page),
            renderer,
            HandlerOptions {
                commands: settings.server.commands,
                seed_when_empty: settings.database.seed_when_empty,
            },
        ))
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    /// Answer a request path such as `/`, `/3` or `/push/2`.
    pub fn handle(&self, path: &str) -> Result<String, AppError> {
        let segments: Vec<&str> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        let parameter = segments.first().copied().unwrap_or("1");

        if self.options.commands {
            if let Some(command) = CommandKind::parse(parameter) {
                return self.run_command(command, segments.get(1).copied());
            }
        }

        self.serve_page(parameter)
    }

    fn run_command(&self, command: CommandKind, argument: Option<&str>) -> Result<String, AppError> {
        info!(
            target = "linkroll::handler",
            op = "command",
            command = ?command,
            argument = argument.unwrap_or(""),
            "Running diagnostic command"
        );

        match command {
            CommandKind::Cache => serde_json::to_string(&self.cache.status())
                .map_err(|err| AppError::unexpected(format!("cache status: {err}"))),
            CommandKind::Stack => {
                let count = parse_count(argument)?;
                let mut db = mutex_lock(&self.store, SOURCE, "stack");
                for _ in 0..count {
                    let link = self.synthetic_link();
                    if absorb_missing_source(db.publish_later(&[link]), "stack")?.is_none() {
                        break;
                    }
                }
                Ok(self.current_id().to_string())
            }
            CommandKind::Push => {
                let count = parse_count(argument)?;
                let mut db = mutex_lock(&self.store, SOURCE, "push");
                for _ in 0..count {
                    let link = self.synthetic_link();
                    db.publish(vec![link])?;
                }
                Ok(self.current_id().to_string())
            }
            CommandKind::Move => {
                let count = parse_count(argument)?;
                let mut db = mutex_lock(&self.store, SOURCE, "move");
                absorb_missing_source(db.move_entries(count), "move")?;
                Ok(self.current_id().to_string())
            }
            CommandKind::Print => {
                let mut db = mutex_lock(&self.store, SOURCE, "print");
                let links: Vec<String> = db.links()?.map(|link| link.to_string()).collect();
                Ok(links.join("\n<hr>\n"))
            }
        }
    }

    fn serve_page(&self, parameter: &str) -> Result<String, AppError> {
        let mut db = mutex_lock(&self.store, SOURCE, "serve_page");

        if self.options.seed_when_empty {
            db.seed_defaults_if_empty()?;
        }
        db.move_if_due()?;

        let number = parameter.parse::<i64>().unwrap_or(1);
        if number <= 0 {
            return Ok(OUT_OF_RANGE.to_string());
        }
        let number = u32::try_from(number).unwrap_or(u32::MAX);

        if db.is_stale()? {
            let removed = self.cache.clear();
            info!(
                target = "linkroll::handler",
                op = "invalidate",
                removed,
                "Link store changed; page cache cleared"
            );
        }

        if let Some(html) = self.cache.rendered(number) {
            return Ok(html.to_string());
        }
        // Read under the store lock; a later clear outdates this render.
        let generation = self.cache.generation();

        let Some(links) = self.paginator.page(number, &mut *db, &self.cache)? else {
            return Ok(redirection(self.renderer.base_url()));
        };
        drop(db);

        let html: Arc<str> = Arc::from(self.renderer.render_page(number, &links)?);
        self.cache.store_rendered_for(number, Arc::clone(&html), generation);
        Ok(html.to_string())
    }

    fn synthetic_link(&self) -> Link {
        let id = self.last_id.fetch_add(1, Ordering::Relaxed) + 1;
        let text = id.to_string();
        Link::new(
            text.clone(),
            text.clone(),
            text,
            i64::try_from(id).unwrap_or(i64::MAX),
        )
    }

    fn current_id(&self) -> u64 {
        self.last_id.load(Ordering::Relaxed)
    }
}

fn parse_count(argument: Option<&str>) -> Result<usize, AppError> {
    match argument {
        None => Ok(1),
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::validation(format!("`{raw}` is not a count"))),
    }
}

/// A missing staging store is a configuration problem: log it and carry on.
fn absorb_missing_source<T>(
    result: Result<T, PublishError>,
    op: &'static str,
) -> Result<Option<T>, AppError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(PublishError::NoSource) => {
            warn!(
                target = "linkroll::handler",
                op,
                "Autopublish is not active; no staging store to use"
            );
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}
