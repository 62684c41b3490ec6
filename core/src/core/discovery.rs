use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeSet;
use url::Url;

use crate::core::{Parameter, Surface, SurfaceMethod};

const EXCLUDED_INPUT_TYPES: &[&str] = &["submit", "button", "image"];

fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

/// Turns a fetched page into injectable surfaces: one per form and one per
/// same-origin endpoint reached through a query-bearing link.
pub struct SurfaceDiscovery {
    base: Url,
}

impl SurfaceDiscovery {
    /// `base` is the URL the page was fetched from.
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Forms first, then query surfaces, each in document order. Forms that do
    /// not submit over http(s) are skipped.
    pub fn discover(&self, page_body: &str) -> Vec<Surface> {
        let document = Html::parse_document(page_body);
        let mut surfaces = self.forms(&document);
        surfaces.extend(self.query_surfaces(&document));
        surfaces
    }

    pub fn discover_forms(&self, page_body: &str) -> Vec<Surface> {
        self.forms(&Html::parse_document(page_body))
    }

    /// Query parameter names reachable from the page, including the base URL's own.
    pub fn discover_parameters(&self, page_body: &str) -> BTreeSet<String> {
        let document = Html::parse_document(page_body);
        self.query_surfaces(&document)
            .into_iter()
            .flat_map(|s| s.parameters.into_iter().map(|p| p.name))
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Absolute actions pass through. Relative ones are joined against the base;
    /// if that join leaves the base origin the leading slashes are stripped and
    /// the action is joined again, relative to the base directory.
    pub fn resolve_action(&self, action: &str) -> Url {
        let action = action.trim();
        if action.is_empty() {
            return self.base.clone();
        }
        if let Ok(absolute) = Url::parse(action) {
            if matches!(absolute.scheme(), "http" | "https") {
                return absolute;
            }
        }
        match self.base.join(action) {
            Ok(url) if url.origin() == self.base.origin() => url,
            _ => self
                .base
                .join(action.trim_start_matches('/'))
                .unwrap_or_else(|_| self.base.clone()),
        }
    }

    fn forms(&self, document: &Html) -> Vec<Surface> {
        let form_selector = selector("form");
        let field_selector = selector("input, textarea, select");

        document
            .select(&form_selector)
            .filter_map(|form| {
                let action = form.value().attr("action").unwrap_or("").to_string();
                let endpoint = self.resolve_action(&action);
                if !matches!(endpoint.scheme(), "http" | "https") {
                    return None;
                }
                let method = SurfaceMethod::from_form(form.value().attr("method"));
                let mut parameters = Vec::new();
                for field in form.select(&field_selector) {
                    if let Some(param) = form_field(field) {
                        push_unique(&mut parameters, param);
                    }
                }
                Some(Surface {
                    endpoint,
                    action,
                    method,
                    parameters,
                })
            })
            .collect()
    }

    fn query_surfaces(&self, document: &Html) -> Vec<Surface> {
        let link_selector = selector("a[href], area[href], link[href], iframe[src], frame[src]");
        let mut surfaces: Vec<Surface> = Vec::new();

        let mut candidates: Vec<(String, Url)> = Vec::new();
        if self.base.query().is_some() {
            candidates.push((self.base.to_string(), self.base.clone()));
        }
        for element in document.select(&link_selector) {
            let raw = element
                .value()
                .attr("href")
                .or_else(|| element.value().attr("src"))
                .unwrap_or("")
                .trim();
            if raw.is_empty() || !raw.contains('?') {
                continue;
            }
            if let Ok(url) = self.base.join(raw) {
                if url.origin() == self.base.origin() && url.query().is_some() {
                    candidates.push((raw.to_string(), url));
                }
            }
        }

        for (raw, url) in candidates {
            let mut endpoint = url.clone();
            endpoint.set_query(None);
            endpoint.set_fragment(None);

            let params: Vec<Parameter> = url
                .query_pairs()
                .map(|(k, v)| Parameter {
                    name: k.to_string(),
                    kind: "query".to_string(),
                    default_value: Some(v.to_string()).filter(|v| !v.is_empty()),
                })
                .collect();

            match surfaces.iter_mut().find(|s| s.endpoint == endpoint) {
                Some(existing) => {
                    for param in params {
                        push_unique(&mut existing.parameters, param);
                    }
                }
                None => {
                    let mut parameters = Vec::new();
                    for param in params {
                        push_unique(&mut parameters, param);
                    }
                    surfaces.push(Surface {
                        action: raw,
                        endpoint,
                        method: SurfaceMethod::Get,
                        parameters,
                    });
                }
            }
        }

        surfaces
    }
}

fn form_field(field: ElementRef<'_>) -> Option<Parameter> {
    let element = field.value();
    let kind = match element.name() {
        "textarea" | "select" => element.name().to_string(),
        _ => element.attr("type").unwrap_or("text").trim().to_lowercase(),
    };
    if EXCLUDED_INPUT_TYPES.contains(&kind.as_str()) {
        return None;
    }
    let default_value = match element.name() {
        "textarea" => Some(field.text().collect::<String>()),
        "select" => selected_option(field),
        _ => element.attr("value").map(str::to_string),
    };
    Some(Parameter {
        name: element.attr("name").unwrap_or("").to_string(),
        kind,
        default_value: default_value.filter(|v| !v.is_empty()),
    })
}

/// The `selected` option's value, else the first option's.
fn selected_option(select: ElementRef<'_>) -> Option<String> {
    let option_selector = selector("option");
    let options: Vec<ElementRef<'_>> = select.select(&option_selector).collect();
    let chosen = options
        .iter()
        .find(|o| o.value().attr("selected").is_some())
        .or_else(|| options.first())?;
    Some(
        chosen
            .value()
            .attr("value")
            .map(str::to_string)
            .unwrap_or_else(|| chosen.text().collect::<String>().trim().to_string()),
    )
}

/// Ordered-set insert keyed on name. Unnamed fields are all kept.
fn push_unique(parameters: &mut Vec<Parameter>, param: Parameter) {
    if param.name.is_empty() || !parameters.iter().any(|p| p.name == param.name) {
        parameters.push(param);
    }
}
