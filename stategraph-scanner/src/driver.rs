//! Static HTTP driver.
//!
//! A cookie-keeping reqwest client whose pages are rendered into role
//! snapshots with scraper. Scripts never run, so links and plain HTML forms
//! are the only things a click can do.

use crate::browser::{Browser, LoadState, Page, Target};
use crate::error::{Result, ScanError};
use crate::url::resolve;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;
use url::{Url, form_urlencoded};

const USER_AGENT: &str = concat!(
    "Stategraph/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/trapdoorsec/stategraph)"
);
const BLANK_URL: &str = "about:blank";

const SKIPPED_TAGS: [&str; 9] = [
    "head", "script", "style", "noscript", "template", "svg", "meta", "link", "iframe",
];
const POINTER_ROLES: [&str; 6] = ["button", "link", "tab", "menuitem", "treeitem", "disclosure"];
const NON_TEXT_INPUTS: [&str; 8] = [
    "hidden", "submit", "button", "reset", "image", "checkbox", "radio", "file",
];

pub struct HttpBrowser {
    client: Client,
    closed: Arc<AtomicBool>,
}

impl HttpBrowser {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        if self.is_closed() {
            return Err(ScanError::SessionClosed("browser closed".to_string()));
        }
        Ok(Box::new(HttpPage {
            client: self.client.clone(),
            browser_closed: self.closed.clone(),
            closed: AtomicBool::new(false),
            doc: Mutex::new(Document::blank()),
        }))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Follow(String),
    Submit(usize),
    Field(String),
    Inert,
}

#[derive(Debug, Clone)]
struct Control {
    role: String,
    name: String,
    action: Action,
    form: Option<usize>,
}

#[derive(Debug, Clone)]
struct FormSpec {
    action: String,
    method: Method,
    defaults: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Rendered {
    snapshot: String,
    controls: Vec<Control>,
    forms: Vec<FormSpec>,
}

#[derive(Debug)]
struct Document {
    url: String,
    body: String,
    rendered: Rendered,
    /// Filled values keyed by owning form and field name.
    values: HashMap<(Option<usize>, String), String>,
}

impl Document {
    fn blank() -> Self {
        Self {
            url: BLANK_URL.to_string(),
            body: String::new(),
            rendered: Rendered::default(),
            values: HashMap::new(),
        }
    }
}

pub struct HttpPage {
    client: Client,
    browser_closed: Arc<AtomicBool>,
    closed: AtomicBool,
    doc: Mutex<Document>,
}

impl HttpPage {
    fn doc(&self) -> MutexGuard<'_, Document> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ScanError::SessionClosed("page closed".to_string()));
        }
        Ok(())
    }

    async fn load(
        &self,
        method: Method,
        url: &str,
        form: Option<Vec<(String, String)>>,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        let mut target =
            Url::parse(url).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", url, e)))?;

        let request = match (method == Method::POST, form) {
            (true, pairs) => {
                let body = form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs.unwrap_or_default())
                    .finish();
                self.client
                    .post(target)
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(body)
            }
            (false, Some(pairs)) => {
                target.query_pairs_mut().clear().extend_pairs(pairs);
                self.client.get(target)
            }
            (false, None) => self.client.get(target),
        };

        debug!(method = %method, url = %url, "Loading page");
        let response = request.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                ScanError::Timeout(timeout, format!("loading {}", url))
            } else {
                ScanError::HttpError(e)
            }
        })?;

        let final_url = response.url().to_string();
        let status = response.status().as_u16();
        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/html"));
        let body = response.text().await?;
        debug!(url = %final_url, status, is_html, "Loaded page");

        let (body, rendered) = if is_html {
            let rendered = render(&body, &final_url);
            (body, rendered)
        } else {
            (String::new(), Rendered::default())
        };
        *self.doc() = Document {
            url: final_url,
            body,
            rendered,
            values: HashMap::new(),
        };
        Ok(())
    }

    async fn submit(&self, form: usize, timeout: Duration) -> Result<()> {
        let (spec, filled) = {
            let doc = self.doc();
            let filled: Vec<(String, String)> = doc
                .values
                .iter()
                .filter(|((owner, _), _)| *owner == Some(form))
                .map(|((_, name), value)| (name.clone(), value.clone()))
                .collect();
            (doc.rendered.forms.get(form).cloned(), filled)
        };
        let spec = spec.ok_or_else(|| ScanError::ElementUnavailable(format!("form #{}", form)))?;

        let mut pairs = spec.defaults;
        for (name, value) in filled {
            match pairs.iter_mut().find(|(n, _)| *n == name) {
                Some(pair) => pair.1 = value,
                None => pairs.push((name, value)),
            }
        }
        self.load(spec.method, &spec.action, Some(pairs), timeout).await
    }

    /// Find what a target points at on the current document.
    fn locate(&self, target: &Target) -> Result<Option<(Action, Option<usize>)>> {
        let doc = self.doc();
        match target {
            Target::Role(query) => Ok(doc
                .rendered
                .controls
                .iter()
                .find(|c| query.matches(&c.role, &c.name))
                .map(|c| (c.action.clone(), c.form))),
            Target::Css(selector) => locate_css(&doc.body, &doc.url, selector),
        }
    }
}

#[async_trait]
impl Page for HttpPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        self.load(Method::GET, url, None, timeout).await
    }

    async fn wait_for_load_state(&self, _state: LoadState, _timeout: Duration) -> Result<()> {
        // A fetched document is complete; there is nothing left to load.
        self.ensure_open()
    }

    async fn snapshot(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.doc().rendered.snapshot.clone())
    }

    async fn url(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.doc().url.clone())
    }

    async fn is_visible(&self, target: &Target) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.locate(target)?.is_some())
    }

    async fn click(&self, target: &Target, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        let (action, _) = self
            .locate(target)?
            .ok_or_else(|| ScanError::ElementUnavailable(target.to_string()))?;
        match action {
            Action::Follow(url) => self.load(Method::GET, &url, None, timeout).await,
            Action::Submit(form) => self.submit(form, timeout).await,
            Action::Field(_) | Action::Inert => Ok(()),
        }
    }

    async fn fill(&self, target: &Target, value: &str, _timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        match self.locate(target)? {
            Some((Action::Field(name), form)) => {
                self.doc().values.insert((form, name), value.to_string());
                Ok(())
            }
            Some(_) => Err(ScanError::ElementUnavailable(format!(
                "{} is not a text field",
                target
            ))),
            None => Err(ScanError::ElementUnavailable(target.to_string())),
        }
    }

    async fn press(&self, target: &Target, key: &str, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        let located = self
            .locate(target)?
            .ok_or_else(|| ScanError::ElementUnavailable(target.to_string()))?;
        match (key, located) {
            ("Enter", (Action::Submit(form), _)) | ("Enter", (Action::Field(_), Some(form))) => {
                self.submit(form, timeout).await
            }
            ("Enter", (Action::Follow(url), _)) => self.load(Method::GET, &url, None, timeout).await,
            _ => Ok(()),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.browser_closed.load(Ordering::SeqCst)
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "'"))
}

fn is_hidden(el: ElementRef<'_>) -> bool {
    let v = el.value();
    if v.attr("hidden").is_some() || v.attr("aria-hidden") == Some("true") {
        return true;
    }
    if v.name() == "input" && v.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden")) {
        return true;
    }
    v.attr("style").is_some_and(|s| {
        let s: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        s.to_ascii_lowercase().contains("display:none")
    })
}

fn accessible_name(el: ElementRef<'_>) -> String {
    let v = el.value();
    if let Some(label) = v.attr("aria-label") {
        return collapse(label);
    }
    let text = collapse(&el.text().collect::<String>());
    if !text.is_empty() {
        return text;
    }
    for attr in ["title", "value", "placeholder", "alt", "name"] {
        if let Some(value) = v.attr(attr).map(collapse).filter(|s| !s.is_empty()) {
            return value;
        }
    }
    String::new()
}

fn input_type(el: ElementRef<'_>) -> String {
    el.value()
        .attr("type")
        .unwrap_or("text")
        .to_ascii_lowercase()
}

fn form_index(el: ElementRef<'_>, forms: &[ElementRef<'_>]) -> Option<usize> {
    let owner = el
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "form")?;
    forms.iter().position(|f| f.id() == owner.id())
}

fn form_spec(form: ElementRef<'_>, page_url: &str) -> FormSpec {
    let v = form.value();
    let action = v
        .attr("action")
        .filter(|a| !a.trim().is_empty())
        .and_then(|a| resolve(a, page_url))
        .unwrap_or_else(|| page_url.to_string());
    let method = match v.attr("method") {
        Some(m) if m.eq_ignore_ascii_case("post") => Method::POST,
        _ => Method::GET,
    };

    let mut defaults = Vec::new();
    for field in form.descendants().filter_map(ElementRef::wrap) {
        let fv = field.value();
        let Some(name) = fv.attr("name") else {
            continue;
        };
        match fv.name() {
            "input" => {
                let kind = input_type(field);
                let checked = fv.attr("checked").is_some();
                if matches!(kind.as_str(), "checkbox" | "radio") && checked {
                    defaults.push((name.to_string(), fv.attr("value").unwrap_or("on").to_string()));
                } else if kind == "hidden" || !NON_TEXT_INPUTS.contains(&kind.as_str()) {
                    defaults.push((name.to_string(), fv.attr("value").unwrap_or_default().to_string()));
                }
            }
            "textarea" => defaults.push((name.to_string(), field.text().collect())),
            _ => {}
        }
    }

    FormSpec {
        action,
        method,
        defaults,
    }
}

/// Role, name and click behaviour of an element, if it is one a user could
/// act on.
fn classify(el: ElementRef<'_>, page_url: &str, forms: &[ElementRef<'_>]) -> Option<(String, String, Action)> {
    let v = el.value();
    let form = form_index(el, forms);
    let name = accessible_name(el);

    if let Some(role) = v.attr("role").map(str::to_ascii_lowercase)
        && POINTER_ROLES.contains(&role.as_str())
    {
        let action = v
            .attr("href")
            .and_then(|h| resolve(h, page_url))
            .map_or(Action::Inert, Action::Follow);
        return Some((role, name, action));
    }

    match v.name() {
        "a" => {
            let href = v.attr("href")?;
            let action = resolve(href, page_url).map_or(Action::Inert, Action::Follow);
            Some(("link".to_string(), name, action))
        }
        "button" => {
            let kind = v.attr("type").unwrap_or("submit").to_ascii_lowercase();
            let action = match form {
                Some(idx) if kind == "submit" => Action::Submit(idx),
                _ => Action::Inert,
            };
            Some(("button".to_string(), name, action))
        }
        "input" => {
            let kind = input_type(el);
            match kind.as_str() {
                "submit" | "image" => {
                    let action = form.map_or(Action::Inert, Action::Submit);
                    let name = if name.is_empty() { "Submit".to_string() } else { name };
                    Some(("button".to_string(), name, action))
                }
                "button" | "reset" => Some(("button".to_string(), name, Action::Inert)),
                "hidden" | "file" => None,
                "checkbox" | "radio" => Some((kind, name, Action::Inert)),
                _ => {
                    let field = v.attr("name").or(v.attr("id"))?.to_string();
                    Some(("textbox".to_string(), name, Action::Field(field)))
                }
            }
        }
        "textarea" => {
            let field = v.attr("name").or(v.attr("id"))?.to_string();
            Some(("textbox".to_string(), name, Action::Field(field)))
        }
        _ => None,
    }
}

fn locate_css(body: &str, page_url: &str, selector: &str) -> Result<Option<(Action, Option<usize>)>> {
    let parsed = Selector::parse(selector)
        .map_err(|e| ScanError::Other(format!("invalid selector {}: {:?}", selector, e)))?;
    let document = Html::parse_document(body);
    let forms: Vec<ElementRef<'_>> = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "form")
        .collect();

    let found = document.select(&parsed).find(|el| {
        !is_hidden(*el)
            && !el
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(is_hidden)
    });
    Ok(found.and_then(|el| {
        classify(el, page_url, &forms).map(|(_, _, action)| (action, form_index(el, &forms)))
    }))
}

struct Renderer<'a> {
    page_url: &'a str,
    forms: &'a [ElementRef<'a>],
    lines: Vec<String>,
    controls: Vec<Control>,
}

impl<'a> Renderer<'a> {
    fn push(&mut self, indent: usize, line: String) {
        self.lines.push(format!("{}- {}", "  ".repeat(indent), line));
    }

    fn children(&mut self, el: ElementRef<'a>, indent: usize) {
        for child in el.children() {
            match child.value() {
                Node::Text(text) => {
                    let text = collapse(text);
                    if !text.is_empty() {
                        self.push(indent, format!("text: {}", text));
                    }
                }
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        self.element(child, indent);
                    }
                }
                _ => {}
            }
        }
    }

    fn element(&mut self, el: ElementRef<'a>, indent: usize) {
        let tag = el.value().name();
        if SKIPPED_TAGS.contains(&tag) || is_hidden(el) {
            return;
        }

        if let Some((role, name, action)) = classify(el, self.page_url, self.forms) {
            let reference = format!("e{}", self.controls.len() + 1);
            let pointer = POINTER_ROLES.contains(&role.as_str());
            let mut line = role.clone();
            if !name.is_empty() {
                line.push(' ');
                line.push_str(&quoted(&name));
            }
            line.push_str(&format!(" [ref={}]", reference));
            if pointer {
                line.push_str(" [cursor=pointer]");
            }
            let href = el.value().attr("href").filter(|_| pointer);
            if href.is_some() {
                line.push(':');
            }
            self.push(indent, line);
            if let Some(href) = href {
                self.push(indent + 1, format!("/url: {}", href));
            }
            self.controls.push(Control {
                role,
                name,
                action,
                form: form_index(el, self.forms),
            });
            return;
        }

        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = &tag[1..];
                let text = collapse(&el.text().collect::<String>());
                self.push(indent, format!("heading {} [level={}]", quoted(&text), level));
            }
            "p" | "label" => {
                let text = collapse(&el.text().collect::<String>());
                let has_controls = el
                    .descendants()
                    .filter_map(ElementRef::wrap)
                    .skip(1)
                    .any(|d| classify(d, self.page_url, self.forms).is_some());
                if has_controls {
                    self.children(el, indent);
                } else if !text.is_empty() {
                    self.push(indent, format!("paragraph: {}", text));
                }
            }
            "nav" | "ul" | "ol" | "li" | "main" | "form" | "header" | "footer" | "table" | "tr" => {
                let role = match tag {
                    "nav" => "navigation",
                    "ul" | "ol" => "list",
                    "li" => "listitem",
                    "header" => "banner",
                    "footer" => "contentinfo",
                    "tr" => "row",
                    other => other,
                };
                self.push(indent, format!("{}:", role));
                self.children(el, indent + 1);
            }
            _ => self.children(el, indent),
        }
    }
}

/// Render a document as an indented role tree. Reference tokens are assigned
/// in document order and are only valid for this rendering.
fn render(body: &str, page_url: &str) -> Rendered {
    let document = Html::parse_document(body);
    let forms: Vec<ElementRef<'_>> = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "form")
        .collect();
    let specs = forms.iter().map(|f| form_spec(*f, page_url)).collect();

    let mut renderer = Renderer {
        page_url,
        forms: &forms,
        lines: Vec::new(),
        controls: Vec::new(),
    };
    renderer.children(document.root_element(), 0);

    Rendered {
        snapshot: renderer.lines.join("\n"),
        controls: renderer.controls,
        forms: specs,
    }
}
