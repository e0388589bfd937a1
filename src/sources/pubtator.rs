//! PubTator3 abstract search adapter.
//!
//! Searches PubMed abstracts through PubTator3 and reports the top hit's
//! bibliographic fields. PubTator3 search results carry no abstract body;
//! other abstract sources fill that in during merge.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Instant;

use crate::models::{fields, PartialRecord, Query, QueryKinds};
use crate::sources::{
    fetch, normalize_doi, parse_json, SourceAdapter, SourceError, SourceSettings,
};
use crate::utils::{HttpRequest, Transport};

/// PubTator3 research source
#[derive(Debug, Clone)]
pub struct PubTatorSource {
    transport: Arc<dyn Transport>,
    settings: SourceSettings,
}

impl PubTatorSource {
    pub const NAME: &'static str = "pubtator";

    pub fn new(transport: Arc<dyn Transport>, settings: SourceSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    fn parse_hit(&self, hit: PtHit) -> PartialRecord {
        let pmid = hit.pmid.and_then(|v| match v {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) => Some(s),
            _ => None,
        });
        let date = hit
            .date
            .map(|d| d.split('T').next().unwrap_or_default().to_string());
        let year = date
            .as_deref()
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse().ok());
        let url = pmid
            .as_ref()
            .map(|p| format!("https://pubmed.ncbi.nlm.nih.gov/{}/", p));

        PartialRecord::builder(Self::NAME, self.settings.confidence)
            .id(fields::PMID, pmid)
            .id(fields::DOI, hit.doi.as_deref().and_then(normalize_doi))
            .text(fields::TITLE, hit.title)
            .list(fields::AUTHORS, hit.authors)
            .text(fields::VENUE, hit.journal)
            .integer(fields::YEAR, year)
            .text(fields::PUBLICATION_DATE, date)
            .text(fields::URL, url)
            .build()
    }
}

#[async_trait]
impl SourceAdapter for PubTatorSource {
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
        let text = query.key().trim().replace('"', "");
        let page: u32 = query.option_or("page", 1);

        let request = HttpRequest::get(self.settings.url("search/"))
            .with_query("text", format!("abstract:\"{}\"", text))
            .with_query("page_size", "1")
            .with_query("page", page.to_string());

        let response = fetch(Self::NAME, self.transport.as_ref(), request, deadline).await?;
        let data: PtSearchResponse = parse_json(Self::NAME, &response)?;

        let hit = data
            .results
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::not_found(Self::NAME, "no matching abstract"))?;
        Ok(self.parse_hit(hit))
    }
}

#[derive(Debug, Deserialize)]
struct PtSearchResponse {
    #[serde(default)]
    results: Vec<PtHit>,
}

#[derive(Debug, Deserialize)]
struct PtHit {
    pmid: Option<serde_json::Value>,
    title: Option<String>,
    journal: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    date: Option<String>,
    doi: Option<String>,
}
