//! PubChem property-table adapter.
//!
//! Three calls under one deadline: resolve the key to CIDs, fetch the
//! property table for the first CID, then fetch its synonyms. A failed
//! synonym call degrades to a record without synonyms unless the deadline
//! is what failed.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Instant;

use super::pubchem::{compound_request, image_url};
use crate::models::{fields, PartialRecord, Query, QueryKinds};
use crate::sources::{
    fetch, parse_json, SourceAdapter, SourceError, SourceErrorKind, SourceSettings,
};
use crate::utils::{HttpRequest, Transport};

const PROPERTIES: &str = "MolecularFormula,MolecularWeight,CanonicalSMILES,InChI,InChIKey,IUPACName,XLogP,TPSA,Complexity,Charge,HeavyAtomCount";

const DEFAULT_MAX_SYNONYMS: usize = 10;

/// PubChem CID → properties → synonyms source
#[derive(Debug, Clone)]
pub struct PubChemPropertySource {
    transport: Arc<dyn Transport>,
    settings: SourceSettings,
}

impl PubChemPropertySource {
    pub const NAME: &'static str = "pubchem_rest";

    pub fn new(transport: Arc<dyn Transport>, settings: SourceSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    async fn resolve_cid(&self, query: &Query, deadline: Instant) -> Result<i64, SourceError> {
        let request = compound_request(&self.settings, query, "cids/JSON");
        let response = fetch(Self::NAME, self.transport.as_ref(), request, deadline).await?;
        let data: CidResponse = parse_json(Self::NAME, &response)?;

        data.identifier_list
            .and_then(|list| list.cid.into_iter().find(|cid| *cid > 0))
            .ok_or_else(|| SourceError::not_found(Self::NAME, "no CID for query"))
    }

    async fn properties(&self, cid: i64, deadline: Instant) -> Result<Properties, SourceError> {
        let request = HttpRequest::get(
            self.settings
                .url(&format!("compound/cid/{}/property/{}/JSON", cid, PROPERTIES)),
        );
        let response = fetch(Self::NAME, self.transport.as_ref(), request, deadline).await?;
        let data: PropertyResponse = parse_json(Self::NAME, &response)?;

        data.property_table
            .properties
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::not_found(Self::NAME, format!("no properties for CID {}", cid)))
    }

    async fn synonyms(
        &self,
        cid: i64,
        limit: usize,
        deadline: Instant,
    ) -> Result<Vec<String>, SourceError> {
        let request =
            HttpRequest::get(self.settings.url(&format!("compound/cid/{}/synonyms/JSON", cid)));
        let response = fetch(Self::NAME, self.transport.as_ref(), request, deadline).await?;
        let data: SynonymResponse = parse_json(Self::NAME, &response)?;

        Ok(data
            .information_list
            .information
            .into_iter()
            .next()
            .map(|info| info.synonym.into_iter().take(limit).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl SourceAdapter for PubChemPropertySource {
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
        let cid = self.resolve_cid(query, deadline).await?;
        let props = self.properties(cid, deadline).await?;

        let limit = query.option_or("max_synonyms", DEFAULT_MAX_SYNONYMS);
        let synonyms = match self.synonyms(cid, limit, deadline).await {
            Ok(synonyms) => synonyms,
            Err(err) if err.kind == SourceErrorKind::Timeout => return Err(err),
            Err(err) => {
                tracing::warn!("[pubchem_rest] synonyms for CID {} unavailable: {}", cid, err);
                Vec::new()
            }
        };

        let smiles = props
            .canonical_smiles
            .or(props.connectivity_smiles)
            .or(props.smiles);

        Ok(PartialRecord::builder(Self::NAME, self.settings.confidence)
            .id(fields::CID, Some(cid.to_string()))
            .text(fields::IUPAC_NAME, props.iupac_name)
            .text(fields::MOLECULAR_FORMULA, props.molecular_formula)
            .number(
                fields::MOLECULAR_WEIGHT,
                props.molecular_weight.as_ref().and_then(number),
            )
            .text(fields::SMILES, smiles)
            .text(fields::INCHI, props.inchi)
            .id(fields::INCHI_KEY, props.inchi_key)
            .number(fields::XLOGP, props.xlogp)
            .number(fields::TPSA, props.tpsa)
            .number(fields::COMPLEXITY, props.complexity)
            .integer(fields::CHARGE, props.charge)
            .integer(fields::HEAVY_ATOM_COUNT, props.heavy_atom_count)
            .list(fields::SYNONYMS, synonyms)
            .text(fields::IMAGE_URL, Some(image_url(cid)))
            .build())
    }
}

/// PubChem returns molecular weight as a string or a number depending on version
fn number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct CidResponse {
    #[serde(rename = "IdentifierList")]
    identifier_list: Option<IdentifierList>,
}

#[derive(Debug, Deserialize)]
struct IdentifierList {
    #[serde(rename = "CID", default)]
    cid: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct PropertyResponse {
    #[serde(rename = "PropertyTable")]
    property_table: PropertyTable,
}

#[derive(Debug, Deserialize)]
struct PropertyTable {
    #[serde(rename = "Properties", default)]
    properties: Vec<Properties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Properties {
    molecular_formula: Option<String>,
    molecular_weight: Option<serde_json::Value>,
    #[serde(rename = "CanonicalSMILES")]
    canonical_smiles: Option<String>,
    #[serde(rename = "ConnectivitySMILES")]
    connectivity_smiles: Option<String>,
    #[serde(rename = "SMILES")]
    smiles: Option<String>,
    #[serde(rename = "InChI")]
    inchi: Option<String>,
    #[serde(rename = "InChIKey")]
    inchi_key: Option<String>,
    #[serde(rename = "IUPACName")]
    iupac_name: Option<String>,
    #[serde(rename = "XLogP")]
    xlogp: Option<f64>,
    #[serde(rename = "TPSA")]
    tpsa: Option<f64>,
    complexity: Option<f64>,
    charge: Option<i64>,
    heavy_atom_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SynonymResponse {
    #[serde(rename = "InformationList")]
    information_list: InformationList,
}

#[derive(Debug, Deserialize)]
struct InformationList {
    #[serde(rename = "Information", default)]
    information: Vec<Information>,
}

#[derive(Debug, Deserialize)]
struct Information {
    #[serde(rename = "Synonym", default)]
    synonym: Vec<String>,
}
