//! Semantic Scholar adapter.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Instant;

use crate::models::{fields, PartialRecord, Query, QueryKind, QueryKinds};
use crate::sources::{
    fetch, normalize_doi, parse_json, SourceAdapter, SourceError, SourceSettings,
};
use crate::utils::{HttpRequest, Transport};

const PAPER_FIELDS: &str = "paperId,title,abstract,venue,year,citationCount,isOpenAccess,openAccessPdf,fieldsOfStudy,url,externalIds,publicationDate,journal,authors";

/// Semantic Scholar research source
///
/// Abstract text goes through `/paper/search` (top hit only); identifiers
/// go straight to `/paper/{id}`.
#[derive(Debug, Clone)]
pub struct SemanticScholarSource {
    transport: Arc<dyn Transport>,
    settings: SourceSettings,
}

impl SemanticScholarSource {
    pub const NAME: &'static str = "semantic_scholar";

    pub fn new(transport: Arc<dyn Transport>, settings: SourceSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Add API key to request headers if available
    fn authorize(&self, request: HttpRequest) -> HttpRequest {
        match &self.settings.api_key {
            Some(key) => request.with_header("x-api-key", key.as_str()),
            None => request,
        }
    }

    /// Path segment for an identifier query, if it is one this API accepts
    fn paper_path(key: &str) -> Option<String> {
        if let Some(doi) = normalize_doi(key) {
            return Some(format!("DOI:{}", doi));
        }

        let key = key.trim();
        let is_s2_id = key.len() == 40 && key.chars().all(|c| c.is_ascii_hexdigit());
        let is_prefixed = ["CorpusId:", "PMID:", "ARXIV:"]
            .iter()
            .any(|prefix| key.starts_with(prefix));
        (is_s2_id || is_prefixed).then(|| key.to_string())
    }

    fn parse_paper(&self, paper: S2Paper) -> PartialRecord {
        let external = paper.external_ids.unwrap_or_default();

        PartialRecord::builder(Self::NAME, self.settings.confidence)
            .id(fields::PAPER_ID, paper.paper_id)
            .id(fields::DOI, external.doi)
            .id(fields::PMID, external.pubmed)
            .text(fields::TITLE, paper.title)
            .text(fields::ABSTRACT, paper.r#abstract)
            .list(
                fields::AUTHORS,
                paper.authors.into_iter().filter_map(|a| a.name),
            )
            .text(
                fields::VENUE,
                paper.venue.filter(|v| !v.is_empty()).or(paper.journal.and_then(|j| j.name)),
            )
            .integer(fields::YEAR, paper.year)
            .text(fields::PUBLICATION_DATE, paper.publication_date)
            .text(fields::URL, paper.url)
            .integer(fields::CITATION_COUNT, paper.citation_count)
            .text(
                fields::OPEN_ACCESS_PDF,
                paper.open_access_pdf.and_then(|p| p.url),
            )
            .list(fields::FIELDS_OF_STUDY, paper.fields_of_study.unwrap_or_default())
            .build()
    }
}

#[async_trait]
impl SourceAdapter for SemanticScholarSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> QueryKinds {
        QueryKinds::ABSTRACT_TEXT | QueryKinds::IDENTIFIER
    }

    fn priority(&self) -> i32 {
        self.settings.priority
    }

    fn confidence(&self) -> i32 {
        self.settings.confidence
    }

    async fn call(&self, query: &Query, deadline: Instant) -> Result<PartialRecord, SourceError> {
        let paper = match query.kind() {
            QueryKind::Identifier => {
                let path = Self::paper_path(query.key()).ok_or_else(|| {
                    SourceError::not_found(Self::NAME, "not a DOI or Semantic Scholar id")
                })?;
                let request = HttpRequest::get(self.settings.url(&format!("paper/{}", path)))
                    .with_query("fields", PAPER_FIELDS);
                let response = fetch(
                    Self::NAME,
                    self.transport.as_ref(),
                    self.authorize(request),
                    deadline,
                )
                .await?;
                parse_json::<S2Paper>(Self::NAME, &response)?
            }
            _ => {
                let request = HttpRequest::get(self.settings.url("paper/search"))
                    .with_query("query", query.key().trim())
                    .with_query("limit", "1")
                    .with_query("fields", PAPER_FIELDS);
                let response = fetch(
                    Self::NAME,
                    self.transport.as_ref(),
                    self.authorize(request),
                    deadline,
                )
                .await?;
                let data: S2SearchResponse = parse_json(Self::NAME, &response)?;
                data.data
                    .into_iter()
                    .next()
                    .ok_or_else(|| SourceError::not_found(Self::NAME, "no matching paper"))?
            }
        };

        Ok(self.parse_paper(paper))
    }
}

#[derive(Debug, Deserialize)]
struct S2SearchResponse {
    #[serde(default)]
    data: Vec<S2Paper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    paper_id: Option<String>,
    title: Option<String>,
    r#abstract: Option<String>,
    venue: Option<String>,
    year: Option<i64>,
    citation_count: Option<i64>,
    open_access_pdf: Option<S2OpenAccessPdf>,
    fields_of_study: Option<Vec<String>>,
    url: Option<String>,
    external_ids: Option<S2ExternalIds>,
    publication_date: Option<String>,
    journal: Option<S2Journal>,
    #[serde(default)]
    authors: Vec<S2Author>,
}

#[derive(Debug, Default, Deserialize)]
struct S2ExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "PubMed")]
    pubmed: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S2OpenAccessPdf {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S2Journal {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S2Author {
    name: Option<String>,
}
