use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::title_path;
use crate::batch::Coalescer;
use crate::cache::CacheThrough;
use crate::config::Config;
use crate::data::KeySet;
use crate::envelope::GraphResponse;
use crate::error::{Error, Result};
use crate::fetcher::Fetcher;
use crate::handler::{Handler, Identity};
use crate::path::PathKey;
use crate::resolve::{record_for, resolve_fields, settle, Fields};
use crate::value::GraphValue;

/// A catalog title, as the title service describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Title {
    pub name: String,

    #[serde(default)]
    pub year: Option<i64>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub boxshot: Option<String>,

    /// Average rating across all users.
    #[serde(default)]
    pub rating: Option<f64>,
}

impl Title {
    pub fn new(name: impl Into<String>) -> Self {
        Title {
            name: name.into(),
            year: None,
            description: None,
            boxshot: None,
            rating: None,
        }
    }
}

impl Fields for Title {
    fn field(&self, name: &PathKey) -> Option<GraphValue> {
        match name.as_str()? {
            "name" => Some(self.name.as_str().into()),
            "year" => self.year.map(GraphValue::from),
            "description" => self.description.as_deref().map(GraphValue::from),
            "boxshot" => self.boxshot.as_deref().map(GraphValue::from),
            "rating" => self.rating.map(GraphValue::from),
            _ => None,
        }
    }
}

/// `titlesById[ids][fields]`
#[derive(Debug, Clone, PartialEq)]
pub struct TitleQuery {
    pub ids: Vec<i64>,
    pub fields: Vec<PathKey>,
}

impl TitleQuery {
    pub fn new<K: Into<PathKey>>(
        ids: impl IntoIterator<Item = i64>,
        fields: impl IntoIterator<Item = K>,
    ) -> Self {
        TitleQuery {
            ids: ids.into_iter().collect(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

/// Serves title fields out of a title fetcher.
#[derive(Debug)]
pub struct TitlesHandler<F> {
    titles: F,
}

impl<F: Fetcher<Key = i64, Value = Title>> TitlesHandler<F> {
    /// Serve titles from a fetcher that already does its own caching and
    /// coalescing, if it needs any.
    pub fn new(titles: F) -> Self {
        TitlesHandler { titles }
    }

    pub fn titles(&self) -> &F {
        &self.titles
    }
}

impl<F: Fetcher<Key = i64, Value = Title> + 'static> TitlesHandler<CacheThrough<Coalescer<F>>> {
    /// Serve titles from a backend fetcher, through the cached and
    /// coalesced pipeline described by `config`.
    pub fn from_config(titles: F, config: &Config) -> Self {
        TitlesHandler::new(config.build(titles))
    }
}

#[async_trait]
impl<F: Fetcher<Key = i64, Value = Title>> Handler for TitlesHandler<F> {
    type Query = TitleQuery;

    async fn get(&self, _identity: &Identity, query: &TitleQuery) -> Result<GraphResponse> {
        // With no fields, a found title would have nothing to say about itself
        if query.fields.is_empty() {
            return Err(Error::invalid_argument("a title query needs at least one field"));
        }

        let keys: KeySet<i64> = query.ids.iter().copied().collect();
        let records = settle(&keys, self.titles.fetch(keys.clone()).await)?;

        let mut seen = HashSet::with_capacity(keys.len());
        let mut response = GraphResponse::new();
        for &id in query.ids.iter().filter(|&&id| seen.insert(id)) {
            let record = record_for(&records, &id);
            response.extend(resolve_fields(&title_path(id), &query.fields, &record));
        }

        Ok(response)
    }
}
