//! CrossRef DOI metadata adapter.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use tokio::time::Instant;

use crate::models::{fields, PartialRecord, Query, QueryKinds};
use crate::sources::{
    fetch, normalize_doi, parse_json, SourceAdapter, SourceError, SourceSettings,
};
use crate::utils::{HttpRequest, Transport};

static MARKUP: OnceLock<Option<Regex>> = OnceLock::new();

/// Drop JATS/HTML tags and collapse whitespace
fn strip_markup(text: &str) -> String {
    let stripped = match MARKUP.get_or_init(|| Regex::new(r"<[^>]+>").ok()) {
        Some(re) => re.replace_all(text, " ").into_owned(),
        None => text.to_string(),
    };
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// CrossRef research source
///
/// Answers identifier queries only; non-DOI keys fail without a request.
#[derive(Debug, Clone)]
pub struct CrossRefSource {
    transport: Arc<dyn Transport>,
    settings: SourceSettings,
}

impl CrossRefSource {
    pub const NAME: &'static str = "crossref";

    pub fn new(transport: Arc<dyn Transport>, settings: SourceSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    fn parse_work(&self, work: CrWork) -> PartialRecord {
        let authors = work.author.into_iter().filter_map(|a| match (a.given, a.family, a.name) {
            (Some(given), Some(family), _) => Some(format!("{} {}", given, family)),
            (None, Some(family), _) => Some(family),
            (_, None, name) => name,
        });

        let date_parts = work
            .published
            .or(work.issued)
            .and_then(|d| d.date_parts.into_iter().next())
            .unwrap_or_default();
        let year = date_parts.first().copied().flatten();
        let date = match date_parts.as_slice() {
            [Some(y), Some(m), Some(d), ..] => Some(format!("{:04}-{:02}-{:02}", y, m, d)),
            [Some(y), Some(m), ..] => Some(format!("{:04}-{:02}", y, m)),
            _ => None,
        };

        PartialRecord::builder(Self::NAME, self.settings.confidence)
            .id(fields::DOI, work.doi.as_deref().and_then(normalize_doi))
            .text(fields::TITLE, work.title.into_iter().next())
            .text(fields::ABSTRACT, work.r#abstract.as_deref().map(strip_markup))
            .list(fields::AUTHORS, authors)
            .text(fields::VENUE, work.container_title.into_iter().next())
            .integer(fields::YEAR, year)
            .text(fields::PUBLICATION_DATE, date)
            .text(fields::URL, work.url)
            .integer(fields::CITATION_COUNT, work.is_referenced_by_count)
            .build()
    }
}

#[async_trait]
impl SourceAdapter for CrossRefSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> QueryKinds {
        QueryKinds::IDENTIFIER
    }

    fn priority(&self) -> i32 {
        self.settings.priority
    }

    fn confidence(&self) -> i32 {
        self.settings.confidence
    }

    async fn call(&self, query: &Query, deadline: Instant) -> Result<PartialRecord, SourceError> {
        let doi = normalize_doi(query.key())
            .ok_or_else(|| SourceError::not_found(Self::NAME, "DOI required"))?;

        let mut request = HttpRequest::get(self.settings.url(&format!("works/{}", doi)));
        if let Some(mailto) = &self.settings.mailto {
            request = request.with_query("mailto", mailto.as_str());
        }

        let response = fetch(Self::NAME, self.transport.as_ref(), request, deadline).await?;
        let data: CrResponse = parse_json(Self::NAME, &response)?;

        Ok(self.parse_work(data.message))
    }
}

#[derive(Debug, Deserialize)]
struct CrResponse {
    message: CrWork,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CrWork {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(default)]
    title: Vec<String>,
    r#abstract: Option<String>,
    #[serde(default)]
    author: Vec<CrAuthor>,
    #[serde(default)]
    container_title: Vec<String>,
    published: Option<CrDate>,
    issued: Option<CrDate>,
    #[serde(rename = "URL")]
    url: Option<String>,
    is_referenced_by_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CrAuthor {
    given: Option<String>,
    family: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i64>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldValue, QueryKind};
    use crate::sources::mock::StaticTransport;
    use crate::sources::SourceErrorKind;
    use serde_json::json;
    use std::time::Duration;

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(
            strip_markup("<jats:p>Deep  learning <jats:italic>allows</jats:italic>.</jats:p>"),
            "Deep learning allows ."
        );
    }

    #[tokio::test]
    async fn test_doi_lookup() {
        let transport = Arc::new(StaticTransport::new().json(
            "/works/10.1038/nature14539",
            json!({
                "status": "ok",
                "message": {
                    "DOI": "10.1038/nature14539",
                    "title": ["Deep learning"],
                    "abstract": "<jats:p>Deep learning allows computational models.</jats:p>",
                    "author": [
                        {"given": "Yann", "family": "LeCun"},
                        {"name": "Google Brain"}
                    ],
                    "container-title": ["Nature"],
                    "published": {"date-parts": [[2015, 5, 27]]},
                    "URL": "http://dx.doi.org/10.1038/nature14539",
                    "is-referenced-by-count": 45000
                }
            }),
        ));
        let mut settings = SourceSettings::new("http://crossref.test", 30, 4);
        settings.mailto = Some("lab@example.org".into());
        let source = CrossRefSource::new(Arc::clone(&transport) as Arc<dyn Transport>, settings);

        let record = source
            .call(&Query::new("10.1038/nature14539", QueryKind::Identifier), deadline())
            .await
            .unwrap();

        assert_eq!(
            record.get(fields::ABSTRACT).and_then(FieldValue::as_str),
            Some("Deep learning allows computational models.")
        );
        assert_eq!(
            record.get(fields::AUTHORS).and_then(FieldValue::as_list),
            Some(&["Yann LeCun".to_string(), "Google Brain".to_string()][..])
        );
        assert_eq!(
            record.get(fields::PUBLICATION_DATE).and_then(FieldValue::as_str),
            Some("2015-05-27")
        );
        assert_eq!(
            transport.requests()[0].query_param("mailto"),
            Some("lab@example.org")
        );
    }

    #[tokio::test]
    async fn test_non_doi_makes_no_request() {
        let transport = Arc::new(StaticTransport::new());
        let source = CrossRefSource::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            SourceSettings::new("http://crossref.test", 30, 4),
        );

        let err = source
            .call(&Query::new("W1919217223", QueryKind::Identifier), deadline())
            .await
            .unwrap_err();
        assert_eq!(err.kind, SourceErrorKind::NotFound);
        assert_eq!(transport.calls(), 0);
    }
}
