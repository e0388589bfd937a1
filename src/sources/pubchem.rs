//! PubChem compound record adapter.
//!
//! Resolves a name, formula or SMILES to the full PUG REST compound record
//! (`PC_Compounds`) and lifts its property list into canonical fields.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Instant;

use crate::models::{fields, PartialRecord, Query, QueryKind, QueryKinds};
use crate::sources::{fetch, parse_json, SourceAdapter, SourceError, SourceSettings};
use crate::utils::{HttpRequest, Transport};

pub(crate) const IMAGE_URL_BASE: &str = "https://pubchem.ncbi.nlm.nih.gov/image/imgsrv.fcgi";

/// Build a PUG REST request addressing a compound by the query's namespace.
///
/// SMILES go in a query parameter since they may contain `/`.
pub(crate) fn compound_request(
    settings: &SourceSettings,
    query: &Query,
    operation: &str,
) -> HttpRequest {
    let key = query.key().trim();
    match query.kind() {
        QueryKind::Smiles => HttpRequest::get(settings.url(&format!("compound/smiles/{}", operation)))
            .with_query("smiles", key),
        QueryKind::Formula => HttpRequest::get(settings.url(&format!(
            "compound/fastformula/{}/{}",
            urlencoding::encode(key),
            operation
        ))),
        _ => HttpRequest::get(settings.url(&format!(
            "compound/name/{}/{}",
            urlencoding::encode(key),
            operation
        ))),
    }
}

pub(crate) fn image_url(cid: i64) -> String {
    format!("{}?cid={}&t=l", IMAGE_URL_BASE, cid)
}

/// PubChem full compound record source
#[derive(Debug, Clone)]
pub struct PubChemCompoundSource {
    transport: Arc<dyn Transport>,
    settings: SourceSettings,
}

impl PubChemCompoundSource {
    pub const NAME: &'static str = "pubchem";

    pub fn new(transport: Arc<dyn Transport>, settings: SourceSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    fn parse_compound(&self, compound: &PcCompound) -> PartialRecord {
        let cid = compound.id.as_ref().and_then(|id| id.id.as_ref()).and_then(|id| id.cid);
        let props = compound.props.as_deref().unwrap_or_default();

        let prop = |label: &str, name: Option<&str>| {
            props.iter().find(|p| {
                p.urn.label.as_deref() == Some(label)
                    && name.map_or(true, |n| p.urn.name.as_deref() == Some(n))
            })
        };
        let text = |label: &str, name: Option<&str>| prop(label, name).and_then(|p| p.value.as_text());
        let number = |label: &str, name: Option<&str>| prop(label, name).and_then(|p| p.value.as_f64());

        let smiles = text("SMILES", Some("Canonical"))
            .or_else(|| text("SMILES", Some("Connectivity")))
            .or_else(|| text("SMILES", Some("Isomeric")))
            .or_else(|| text("SMILES", Some("Absolute")));

        PartialRecord::builder(Self::NAME, self.settings.confidence)
            .id(fields::CID, cid.map(|c| c.to_string()))
            .text(
                fields::IUPAC_NAME,
                text("IUPAC Name", Some("Preferred")).or_else(|| text("IUPAC Name", None)),
            )
            .text(fields::MOLECULAR_FORMULA, text("Molecular Formula", None))
            .number(fields::MOLECULAR_WEIGHT, number("Molecular Weight", None))
            .text(fields::SMILES, smiles)
            .text(fields::INCHI, text("InChI", None))
            .id(fields::INCHI_KEY, text("InChIKey", None))
            .number(fields::XLOGP, number("Log P", None))
            .number(fields::TPSA, number("Topological", Some("Polar Surface Area")))
            .number(fields::COMPLEXITY, number("Compound Complexity", None))
            .integer(fields::CHARGE, compound.charge)
            .integer(
                fields::HEAVY_ATOM_COUNT,
                compound.count.as_ref().and_then(|c| c.heavy_atom),
            )
            .text(fields::IMAGE_URL, cid.map(image_url))
            .build()
    }
}

#[async_trait]
impl SourceAdapter for PubChemCompoundSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> QueryKinds {
        QueryKinds::CHEMISTRY
    }

    fn priority(&self) -> i32 {
        self.settings.priority
    }

    fn confidence(&self) -> i32 {
        self.settings.confidence
    }

    async fn call(&self, query: &Query, deadline: Instant) -> Result<PartialRecord, SourceError> {
        let request = compound_request(&self.settings, query, "JSON");
        let response = fetch(Self::NAME, self.transport.as_ref(), request, deadline).await?;
        let data: PcResponse = parse_json(Self::NAME, &response)?;

        let compound = data
            .pc_compounds
            .first()
            .ok_or_else(|| SourceError::not_found(Self::NAME, "no compound in response"))?;

        let record = self.parse_compound(compound);
        tracing::debug!(
            "[pubchem] {} -> {} fields",
            query.key(),
            record.len()
        );
        Ok(record)
    }
}

#[derive(Debug, Deserialize)]
struct PcResponse {
    #[serde(rename = "PC_Compounds", default)]
    pc_compounds: Vec<PcCompound>,
}

#[derive(Debug, Deserialize)]
struct PcCompound {
    id: Option<PcCompoundId>,
    props: Option<Vec<PcProp>>,
    charge: Option<i64>,
    count: Option<PcCount>,
}

#[derive(Debug, Deserialize)]
struct PcCompoundId {
    id: Option<PcCid>,
}

#[derive(Debug, Deserialize)]
struct PcCid {
    cid: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PcCount {
    heavy_atom: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PcProp {
    urn: PcUrn,
    value: PcValue,
}

#[derive(Debug, Deserialize)]
struct PcUrn {
    label: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PcValue {
    sval: Option<String>,
    fval: Option<f64>,
    ival: Option<i64>,
}

impl PcValue {
    fn as_text(&self) -> Option<String> {
        self.sval.clone()
    }

    /// Numeric value; newer records carry some numbers as strings
    fn as_f64(&self) -> Option<f64> {
        self.fval
            .or(self.ival.map(|i| i as f64))
            .or_else(|| self.sval.as_deref().and_then(|s| s.trim().parse().ok()))
    }
}
