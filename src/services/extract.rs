//! Item extraction from listing-page HTML.
//!
//! Extraction failure is a hard stop for an area's cycle: a page whose
//! structure changed must never read as "zero items", because the diff
//! would then mark the whole snapshot removed. The configured container
//! selector is the structure probe; a page without it fails extraction,
//! while a container with zero rows is a legitimately empty listing.

use scraper::{Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{AreaConfig, RawItem};
use crate::utils::resolve_url;

/// Extracts raw item records from fetched page content.
pub trait ItemExtractor: Send + Sync {
    fn extract(&self, area: &AreaConfig, content: &str) -> Result<Vec<RawItem>>;
}

/// CSS-selector driven extractor using each area's configured selectors.
#[derive(Debug, Default)]
pub struct SelectorExtractor;

impl SelectorExtractor {
    pub fn new() -> Self {
        Self
    }

    fn parse_selector(s: &str) -> Result<Selector> {
        Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
    }
}

impl ItemExtractor for SelectorExtractor {
    fn extract(&self, area: &AreaConfig, content: &str) -> Result<Vec<RawItem>> {
        let selectors = &area.selectors;
        let container_sel = Self::parse_selector(&selectors.container)?;
        let row_sel = Self::parse_selector(&selectors.row)?;
        let name_sel = Self::parse_selector(&selectors.name)?;
        let link_sel = selectors
            .link
            .as_ref()
            .map(|s| Self::parse_selector(s))
            .transpose()?;

        let document = Html::parse_document(content);

        let Some(container) = document.select(&container_sel).next() else {
            return Err(AppError::extract(
                &area.url,
                format!("container '{}' not found; page structure changed?", selectors.container),
            ));
        };

        let base_url = Url::parse(&area.url)?;
        let mut items = Vec::new();

        for row in container.select(&row_sel) {
            let Some(name_elem) = row.select(&name_sel).next() else {
                continue;
            };
            let name: String = name_elem.text().collect::<String>().trim().to_string();
            if name.is_empty() {
                continue;
            }

            let link_elem = link_sel
                .as_ref()
                .and_then(|sel| row.select(sel).next())
                .or(Some(name_elem));
            let raw_link = link_elem
                .and_then(|e| e.value().attr(&selectors.link_attr))
                .unwrap_or("");
            let url = if raw_link.is_empty() {
                String::new()
            } else {
                resolve_url(&base_url, raw_link)
            };

            items.push(RawItem { name, url });
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AreaSelectors;

    fn area() -> AreaConfig {
        AreaConfig {
            url: "https://example.com/area/list.html".to_string(),
            selectors: AreaSelectors {
                container: "ul.listings".to_string(),
                row: "li.listing".to_string(),
                name: "a.title".to_string(),
                link: None,
                link_attr: "href".to_string(),
            },
            volatile_patterns: vec![],
        }
    }

    #[test]
    fn extracts_items_with_resolved_links() {
        let html = r#"
            <ul class="listings">
                <li class="listing"><a class="title" href="/p/1.html">Parkside 101</a></li>
                <li class="listing"><a class="title" href="https://other.com/p2">Riverview 202</a></li>
            </ul>
        "#;
        let items = SelectorExtractor::new().extract(&area(), html).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "Parkside 101");
        assert_eq!(items[0].url, "https://example.com/p/1.html");
        assert_eq!(items[1].url, "https://other.com/p2");
    }

    #[test]
    fn missing_container_is_an_extract_error() {
        let html = "<div>maintenance page</div>";
        let err = SelectorExtractor::new().extract(&area(), html).unwrap_err();
        assert!(matches!(err, AppError::Extract { .. }));
    }

    #[test]
    fn empty_container_is_a_successful_empty_list() {
        let html = r#"<ul class="listings"></ul>"#;
        let items = SelectorExtractor::new().extract(&area(), html).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn rows_without_names_are_skipped() {
        let html = r#"
            <ul class="listings">
                <li class="listing"><span>no title link</span></li>
                <li class="listing"><a class="title" href="/p/3.html">Hillcrest 303</a></li>
            </ul>
        "#;
        let items = SelectorExtractor::new().extract(&area(), html).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Hillcrest 303");
    }

    #[test]
    fn invalid_selector_is_reported() {
        let mut bad = area();
        bad.selectors.row = "[[invalid".to_string();
        assert!(SelectorExtractor::new().extract(&bad, "<ul></ul>").is_err());
    }
}
