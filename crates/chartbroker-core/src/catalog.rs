use crate::identity::{
    decode_package_reference, encode_service_id, encode_service_name, IdStrategy,
};
use crate::BrokerError;
use chartbroker_repo::{ChartVersion, RepoHome, SearchIndex, SearchResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub description: String,
    pub free: bool,
    /// Parameter schema. Unset for charts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schemas: Option<Value>,
}

/// One offered service: a chart from the merged repository index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub description: String,
    pub bindable: bool,
    pub plans: Vec<Plan>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Catalog of every chart in the repositories configured under `home`.
pub fn build_catalog(
    home: &RepoHome,
    strategy: IdStrategy,
) -> Result<Vec<CatalogEntry>, BrokerError> {
    let index = SearchIndex::from_home(home)?;
    Ok(catalog_from_index(&index, strategy))
}

/// Catalog entries in name order. Charts whose identifiers cannot be
/// derived are logged and skipped.
pub fn catalog_from_index(index: &SearchIndex, strategy: IdStrategy) -> Vec<CatalogEntry> {
    let mut entries = Vec::with_capacity(index.len());
    for result in index.all() {
        match entry_for(&result, strategy) {
            Ok(entry) => entries.push(entry),
            Err(e) => error!("skipping {} in catalog: {e}", result.name),
        }
    }
    debug!("catalog has {} entries", entries.len());
    entries
}

fn entry_for(result: &SearchResult, strategy: IdStrategy) -> Result<CatalogEntry, BrokerError> {
    let name = encode_service_name(&result.name)?;
    if decode_package_reference(&name)? != result.name {
        return Err(BrokerError::InvalidFormat(format!(
            "{} contains '.' and cannot be decoded back",
            result.name
        )));
    }
    let id = match strategy {
        IdStrategy::Name => name.clone(),
        IdStrategy::Digest => encode_service_id(&result.chart.digest)?,
    };
    Ok(CatalogEntry {
        plans: vec![Plan {
            id: id.clone(),
            name: name.clone(),
            description: format!("A default plan for {name}"),
            free: true,
            schemas: None,
        }],
        id,
        name,
        description: result.chart.description.clone(),
        bindable: true,
        metadata: chart_metadata(&result.chart),
    })
}

fn chart_metadata(chart: &ChartVersion) -> Map<String, Value> {
    let value = json!({
        "name": chart.name,
        "home": chart.home,
        "sources": chart.sources,
        "version": chart.version,
        "description": chart.description,
        "keywords": chart.keywords,
        "maintainers": chart.maintainers,
        "icon": chart.icon,
        "apiVersion": chart.api_version,
        "condition": chart.condition,
        "tags": chart.tags,
        "appVersion": chart.app_version,
        "deprecated": chart.deprecated,
        "annotations": chart.annotations,
        "kubeVersion": chart.kube_version,
        "urls": chart.urls,
        "created": chart.created,
        "removed": chart.removed,
        "digest": chart.digest,
        "engine": chart.engine,
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
