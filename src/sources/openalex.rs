//! OpenAlex adapter.
//!
//! OpenAlex ships abstracts as an inverted index (word → positions); the
//! text is rebuilt by ordering words by position.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::time::Instant;

use crate::models::{fields, PartialRecord, Query, QueryKind, QueryKinds};
use crate::sources::{
    fetch, normalize_doi, parse_json, SourceAdapter, SourceError, SourceSettings,
};
use crate::utils::{HttpRequest, Transport};

/// OpenAlex research source
#[derive(Debug, Clone)]
pub struct OpenAlexSource {
    transport: Arc<dyn Transport>,
    settings: SourceSettings,
}

impl OpenAlexSource {
    pub const NAME: &'static str = "openalex";

    pub fn new(transport: Arc<dyn Transport>, settings: SourceSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Join the polite pool when a contact address is configured
    fn polite(&self, request: HttpRequest) -> HttpRequest {
        match &self.settings.mailto {
            Some(mailto) => request.with_query("mailto", mailto.as_str()),
            None => request,
        }
    }

    fn work_path(key: &str) -> Option<String> {
        if let Some(doi) = normalize_doi(key) {
            return Some(format!("works/doi:{}", doi));
        }

        let key = key.trim().trim_start_matches("https://openalex.org/");
        let is_work_id = key.len() > 1
            && key.starts_with(['W', 'w'])
            && key[1..].chars().all(|c| c.is_ascii_digit());
        is_work_id.then(|| format!("works/{}", key.to_ascii_uppercase()))
    }

    fn parse_work(&self, work: OaWork) -> PartialRecord {
        let abstract_text = work
            .abstract_inverted_index
            .as_ref()
            .map(reconstruct_abstract)
            .filter(|text| !text.is_empty());

        let pdf = work
            .best_oa_location
            .as_ref()
            .and_then(|loc| loc.pdf_url.clone())
            .or_else(|| work.open_access.as_ref().and_then(|oa| oa.oa_url.clone()));

        let venue = work
            .primary_location
            .and_then(|loc| loc.source)
            .and_then(|source| source.display_name);

        let pmid = work
            .ids
            .and_then(|ids| ids.pmid)
            .map(|pmid| {
                pmid.trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            });

        let openalex_id = work
            .id
            .as_deref()
            .map(|id| id.trim_start_matches("https://openalex.org/").to_string());

        PartialRecord::builder(Self::NAME, self.settings.confidence)
            .id(fields::OPENALEX_ID, openalex_id)
            .id(fields::DOI, work.doi.as_deref().and_then(normalize_doi))
            .id(fields::PMID, pmid)
            .text(fields::TITLE, work.title.or(work.display_name))
            .text(fields::ABSTRACT, abstract_text)
            .list(
                fields::AUTHORS,
                work.authorships
                    .into_iter()
                    .filter_map(|a| a.author.and_then(|author| author.display_name)),
            )
            .text(fields::VENUE, venue)
            .integer(fields::YEAR, work.publication_year)
            .text(fields::PUBLICATION_DATE, work.publication_date)
            .text(fields::URL, work.doi.or(work.id))
            .integer(fields::CITATION_COUNT, work.cited_by_count)
            .text(fields::OPEN_ACCESS_PDF, pdf)
            .build()
    }
}

/// Rebuild abstract text from an inverted index
pub(crate) fn reconstruct_abstract(index: &HashMap<String, Vec<usize>>) -> String {
    let positions: BTreeMap<usize, &str> = index
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |&p| (p, word.as_str())))
        .collect();
    positions.into_values().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl SourceAdapter for OpenAlexSource {
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
        let work = match query.kind() {
            QueryKind::Identifier => {
                let path = Self::work_path(query.key()).ok_or_else(|| {
                    SourceError::not_found(Self::NAME, "not a DOI or OpenAlex work id")
                })?;
                let request = self.polite(HttpRequest::get(self.settings.url(&path)));
                let response =
                    fetch(Self::NAME, self.transport.as_ref(), request, deadline).await?;
                parse_json::<OaWork>(Self::NAME, &response)?
            }
            _ => {
                let request = self.polite(
                    HttpRequest::get(self.settings.url("works"))
                        .with_query("search", query.key().trim())
                        .with_query("per_page", "1"),
                );
                let response =
                    fetch(Self::NAME, self.transport.as_ref(), request, deadline).await?;
                let data: OaSearchResponse = parse_json(Self::NAME, &response)?;
                data.results
                    .into_iter()
                    .next()
                    .ok_or_else(|| SourceError::not_found(Self::NAME, "no matching work"))?
            }
        };

        Ok(self.parse_work(work))
    }
}

#[derive(Debug, Deserialize)]
struct OaSearchResponse {
    #[serde(default)]
    results: Vec<OaWork>,
}

#[derive(Debug, Deserialize)]
struct OaWork {
    id: Option<String>,
    doi: Option<String>,
    title: Option<String>,
    display_name: Option<String>,
    publication_year: Option<i64>,
    publication_date: Option<String>,
    cited_by_count: Option<i64>,
    abstract_inverted_index: Option<HashMap<String, Vec<usize>>>,
    #[serde(default)]
    authorships: Vec<OaAuthorship>,
    primary_location: Option<OaLocation>,
    best_oa_location: Option<OaLocation>,
    open_access: Option<OaOpenAccess>,
    ids: Option<OaIds>,
}

#[derive(Debug, Deserialize)]
struct OaAuthorship {
    author: Option<OaAuthor>,
}

#[derive(Debug, Deserialize)]
struct OaAuthor {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaLocation {
    source: Option<OaSource>,
    pdf_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaSource {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaOpenAccess {
    oa_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaIds {
    pmid: Option<String>,
}
