//! Cursor-paginated listings: the repository catalog and repository tags.

use crate::client::parse_link_cursor;
use crate::error::{DockhandError, Result};
use crate::registry::Registry;
use reqwest::header::LINK;
use serde::Deserialize;
use serde_json::Value;


/// Catalog endpoint, relative to `/v2/`.
pub const CATALOG_ENDPOINT: &str = "_catalog";

/// One page of `GET /v2/_catalog`.
#[derive(Debug, Default, Deserialize)]
struct CatalogPage {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

/// One page of `GET /v2/<name>/tags/list`. Registries send `null` tags for
/// repositories without any.
#[derive(Debug, Default, Deserialize)]
struct TagsPage {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

impl Registry {
    /// Fetches the pages of a list endpoint, in request order.
    ///
    /// `endpoint` is relative to `/v2/`. `last` and `n` seed the first
    /// request. Unless `lazy`, every page announced through a `Link` header
    /// is fetched until none is announced.
    pub async fn list(
        &self,
        endpoint: &str,
        last: Option<&str>,
        n: Option<usize>,
        lazy: bool,
    ) -> Result<Vec<Value>> {
        let url = format!("{}/{}", self.reference().v2_url(), endpoint);
        let mut cursor = (last.map(str::to_string), n);
        let mut pages = Vec::new();

        loop {
            let query = page_query(&cursor);
            let response = self
                .send(|http| http.get(&url).query(&query), false)
                .await?
                .error_for_status(&url)?;
            pages.push(response.json::<Value>()?);
            tracing::debug!(%url, page = pages.len(), "fetched page");

            if lazy {
                break;
            }
            let next = response
                .header(LINK.as_str())
                .and_then(parse_link_cursor)
                .map(|(last, n)| (Some(last), n));
            match next {
                Some(next) if next != cursor => cursor = next,
                Some(_) => {
                    tracing::warn!(%url, "registry repeated its pagination cursor, stopping");
                    break;
                }
                None => break,
            }
        }

        Ok(pages)
    }

    /// Lists the repositories of the registry.
    ///
    /// `last` and `n` seed the first request; `lazy` stops after one page.
    pub async fn list_repositories(
        &self,
        last: Option<&str>,
        n: Option<usize>,
        lazy: bool,
    ) -> Result<Vec<String>> {
        let pages = self.list(CATALOG_ENDPOINT, last, n, lazy).await?;
        flatten(pages, |page: CatalogPage| page.repositories)
    }

    /// Lists the tags of the session's repository, with the same paging
    /// arguments as [`Registry::list_repositories`].
    pub async fn list_tags(
        &self,
        last: Option<&str>,
        n: Option<usize>,
        lazy: bool,
    ) -> Result<Vec<String>> {
        let endpoint = format!("{}/tags/list", self.reference().repository());
        let pages = self.list(&endpoint, last, n, lazy).await?;
        flatten(pages, |page: TagsPage| page.tags)
    }
}

fn page_query(cursor: &(Option<String>, Option<usize>)) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(n) = cursor.1 {
        query.push(("n", n.to_string()));
    }
    if let Some(last) = &cursor.0 {
        query.push(("last", last.clone()));
    }
    query
}

fn flatten<P, F>(pages: Vec<Value>, field: F) -> Result<Vec<String>>
where
    P: for<'de> Deserialize<'de>,
    F: Fn(P) -> Option<Vec<String>>,
{
    let mut items = Vec::new();
    for page in pages {
        let page: P = serde_json::from_value(page)
            .map_err(|e| DockhandError::validation_with_source("Unexpected list page", e))?;
        items.extend(field(page).unwrap_or_default());
    }
    Ok(items)
}
