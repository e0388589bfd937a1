//! Paperlist search adapter.
//!
//! Two calls under one deadline: a keyword search for the top paper, then
//! its detail record for the abstract and external identifiers. A failed
//! detail call degrades to the search hit alone unless the deadline is what
//! failed.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Instant;

use crate::models::{fields, PartialRecord, Query, QueryKinds};
use crate::sources::{
    fetch, normalize_doi, parse_json, SourceAdapter, SourceError, SourceErrorKind,
    SourceSettings,
};
use crate::utils::{HttpRequest, Transport};

/// Paperlist keyword search source
#[derive(Debug, Clone)]
pub struct PaperlistSource {
    transport: Arc<dyn Transport>,
    settings: SourceSettings,
}

impl PaperlistSource {
    pub const NAME: &'static str = "paperlist";

    pub fn new(transport: Arc<dyn Transport>, settings: SourceSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    async fn search(&self, query: &Query, deadline: Instant) -> Result<PlHit, SourceError> {
        let year_min: i32 = query.option_or("year_min", -1);
        let year_max: i32 = query.option_or("year_max", -1);
        let sort_by = query.option("sort_by").unwrap_or("year-dsc");

        let request = HttpRequest::get(self.settings.url("paper"))
            .with_query("topic", "0.")
            .with_query("year_min", year_min.to_string())
            .with_query("year_max", year_max.to_string())
            .with_query("infl_field", "n_cits")
            .with_query("infl_min", "-1")
            .with_query("search_value", query.key().trim())
            .with_query("sort_by", sort_by)
            .with_query("page_size", "1")
            .with_query("page_ndx", "0");

        let response = fetch(Self::NAME, self.transport.as_ref(), request, deadline).await?;
        let data: PlSearchResponse = parse_json(Self::NAME, &response)?;

        data.page
            .into_iter()
            .find(|hit| hit.id.is_some())
            .ok_or_else(|| SourceError::not_found(Self::NAME, "no matching paper"))
    }

    async fn detail(&self, id: i64, deadline: Instant) -> Result<PlDetail, SourceError> {
        let request =
            HttpRequest::get(self.settings.url("detail")).with_query("id", id.to_string());
        let response = fetch(Self::NAME, self.transport.as_ref(), request, deadline).await?;
        parse_json(Self::NAME, &response)
    }

    fn build(&self, hit: PlHit, detail: PlDetail) -> PartialRecord {
        let arxiv = non_empty(detail.id_arxiv);
        let pdf = arxiv
            .as_ref()
            .map(|id| format!("https://arxiv.org/pdf/{}", id));
        let authors: Vec<String> = hit
            .authors
            .or(detail.authors)
            .map(|a| split_authors(&a))
            .unwrap_or_default();

        PartialRecord::builder(Self::NAME, self.settings.confidence)
            .id(fields::DOI, detail.id_doi.as_deref().and_then(normalize_doi))
            .id(fields::PMID, non_empty(detail.id_pm))
            .id(fields::PAPER_ID, non_empty(detail.id_s2))
            .text(fields::TITLE, hit.title.or(detail.title))
            .text(fields::ABSTRACT, non_empty(detail.abstr))
            .list(fields::AUTHORS, authors)
            .text(fields::VENUE, non_empty(hit.venue.or(detail.venue)))
            .integer(fields::YEAR, hit.year.or(detail.year))
            .integer(fields::CITATION_COUNT, hit.cits_n.or(detail.cits_n))
            .text(fields::OPEN_ACCESS_PDF, pdf)
            .list(fields::FIELDS_OF_STUDY, non_empty(hit.topic.or(detail.topic)))
            .build()
    }
}

#[async_trait]
impl SourceAdapter for PaperlistSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> QueryKinds {
        QueryKinds::ABSTRACT_TEXT
    }

    fn priority(&self) -> i32 {
        self.settings.priority
    }

    fn confidence(&self) -> i32 {
        self.settings.confidence
    }

    async fn call(&self, query: &Query, deadline: Instant) -> Result<PartialRecord, SourceError> {
        let hit = self.search(query, deadline).await?;
        let id = hit.id.unwrap_or_default();

        let detail = match self.detail(id, deadline).await {
            Ok(detail) => detail,
            Err(err) if err.kind == SourceErrorKind::Timeout => return Err(err),
            Err(err) => {
                tracing::warn!("[paperlist] detail for paper {} unavailable: {}", id, err);
                PlDetail::default()
            }
        };

        Ok(self.build(hit, detail))
    }
}

/// Paperlist returns authors as one comma-separated string
fn split_authors(authors: &str) -> Vec<String> {
    authors
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Deserialize)]
struct PlSearchResponse {
    #[serde(default)]
    page: Vec<PlHit>,
}

#[derive(Debug, Deserialize)]
struct PlHit {
    id: Option<i64>,
    title: Option<String>,
    authors: Option<String>,
    year: Option<i64>,
    cits_n: Option<i64>,
    venue: Option<String>,
    topic: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PlDetail {
    title: Option<String>,
    authors: Option<String>,
    year: Option<i64>,
    venue: Option<String>,
    abstr: Option<String>,
    cits_n: Option<i64>,
    id_doi: Option<String>,
    id_arxiv: Option<String>,
    id_s2: Option<String>,
    id_pm: Option<String>,
    topic: Option<String>,
}
