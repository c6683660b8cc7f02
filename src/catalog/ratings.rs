use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{title_path, TITLES_BY_ID};
use crate::batch::Coalescer;
use crate::cache::CacheThrough;
use crate::config::Config;
use crate::data::{KeySet, Record, Records};
use crate::envelope::{GraphEnvelope, GraphResponse};
use crate::error::{Error, Result};
use crate::fetcher::Fetcher;
use crate::handler::{authorize, Authorizer, Handler, Identity, RequireUser};
use crate::path::Path;
use crate::resolve::{record_for, resolve_leaf, settle};
use crate::value::{GraphValue, PathValue};

const USER_RATING: &str = "userRating";

const MIN_RATING: f64 = 1.0;
const MAX_RATING: f64 = 5.0;

/// A rating is keyed by the user who gave it and the title it is for.
pub type RatingKey = (String, i64);

/// Storage for per-user title ratings.
#[async_trait]
pub trait RatingStore: Send + Sync + 'static {
    /// Look up ratings. A title the user hasn't rated is `NotFound`.
    async fn get_ratings(&self, keys: KeySet<RatingKey>) -> Result<Records<RatingKey, f64>>;

    /// Store ratings for one user, returning the rating stored for each
    /// title.
    async fn set_ratings(&self, user: &str, ratings: Vec<(i64, f64)>) -> Result<Records<i64, f64>>;
}

struct RatingReads<S>(Arc<S>);

#[async_trait]
impl<S: RatingStore> Fetcher for RatingReads<S> {
    type Key = RatingKey;
    type Value = f64;

    async fn fetch(&self, keys: KeySet<RatingKey>) -> Result<Records<RatingKey, f64>> {
        self.0.get_ratings(keys).await
    }
}

/// `titlesById[ids].userRating`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingQuery {
    pub ids: Vec<i64>,
}

impl RatingQuery {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        RatingQuery {
            ids: ids.into_iter().collect(),
        }
    }
}

fn rating_path(id: i64) -> Path {
    title_path(id).child(USER_RATING)
}

/// Clamp a rating into the range the catalog accepts.
pub(crate) fn clamp_rating(rating: f64) -> f64 {
    rating.clamp(MIN_RATING, MAX_RATING)
}

/// Reads and writes the calling user's ratings.
///
/// Reads go through a cache, and a successful write replaces the cached
/// rating, so a read following a write sees the written value without
/// another trip to the store. Anonymous callers have no ratings: every
/// rating they ask for is a null atom.
///
/// A rating is a leaf of its own, so a missing or failed rating is reported
/// at `titlesById[id].userRating` rather than at the title. The title's
/// other fields come from a different handler and stay valid.
pub struct RatingsHandler<S: RatingStore> {
    store: Arc<S>,
    ratings: CacheThrough<Coalescer<RatingReads<S>>>,
    authorizer: Box<dyn Authorizer>,
}

impl<S: RatingStore> RatingsHandler<S> {
    pub fn new(store: S, config: &Config) -> Self {
        let store = Arc::new(store);
        RatingsHandler {
            ratings: config.build(RatingReads(store.clone())),
            store,
            authorizer: Box::new(RequireUser),
        }
    }

    /// Replace the check run before writes. The default allows any
    /// identified user.
    pub fn with_authorizer(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizer = Box::new(authorizer);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The cached rating for a user and title, if there is one.
    pub fn cached(&self, user: &str, id: i64) -> Option<Record<f64>> {
        self.ratings.get(&(user.to_owned(), id))
    }

    /// Forget a cached rating, for example after it was changed by some
    /// other writer.
    pub fn invalidate(&self, user: &str, id: i64) {
        self.ratings.invalidate(Some((user.to_owned(), id)))
    }
}

// Every leaf of the envelope must be a number at titlesById[id].userRating
fn parse_ratings(envelope: &GraphEnvelope) -> Result<Vec<(i64, f64)>> {
    envelope
        .path_values()
        .into_iter()
        .map(|PathValue { path, value }| {
            let id = match path.keys() {
                [root, id, field]
                    if root.as_str() == Some(TITLES_BY_ID) && field.as_str() == Some(USER_RATING) =>
                {
                    id.as_index()
                }
                _ => None,
            }
            .ok_or_else(|| Error::invalid_argument(format!("cannot set {}", path)))?;

            let rating = value
                .as_primitive()
                .and_then(|value| value.as_f64())
                .filter(|rating| rating.is_finite())
                .ok_or_else(|| {
                    Error::invalid_argument(format!(
                        "{} is not a valid rating for {}",
                        value.to_json(),
                        path
                    ))
                })?;

            Ok((id, clamp_rating(rating)))
        })
        .collect()
}

#[async_trait]
impl<S: RatingStore> Handler for RatingsHandler<S> {
    type Query = RatingQuery;

    async fn get(&self, identity: &Identity, query: &RatingQuery) -> Result<GraphResponse> {
        let user = match identity.user_id() {
            Some(user) => user,
            None => {
                return Ok(query
                    .ids
                    .iter()
                    .map(|&id| PathValue::new(rating_path(id), GraphValue::atom_null()))
                    .collect())
            }
        };

        let keys: KeySet<RatingKey> = query.ids.iter().map(|&id| (user.to_owned(), id)).collect();
        let records = settle(&keys, self.ratings.fetch(keys.clone()).await)?;

        Ok(query
            .ids
            .iter()
            .map(|&id| {
                let record = record_for(&records, &(user.to_owned(), id));
                resolve_leaf(&rating_path(id), &record)
            })
            .collect())
    }

    async fn set(&self, identity: &Identity, envelope: &GraphEnvelope) -> Result<GraphResponse> {
        let user = authorize(&*self.authorizer, identity)?;
        let ratings = parse_ratings(envelope)?;
        if ratings.is_empty() {
            return Ok(GraphResponse::new());
        }

        debug!(user, count = ratings.len(), "setting ratings");

        let ids: Vec<i64> = ratings.iter().map(|&(id, _rating)| id).collect();
        let keys: KeySet<i64> = ids.iter().copied().collect();
        let stored = settle(&keys, self.store.set_ratings(user, ratings).await)?;

        let mut response = GraphResponse::new();
        for id in ids {
            let record = record_for(&stored, &id);
            let key = (user.to_owned(), id);
            match record {
                Record::Found(..) => self.ratings.insert(key, record.clone()),
                _ => self.ratings.invalidate(Some(key)),
            }
            response.values.push(resolve_leaf(&rating_path(id), &record));
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::path;

    #[test]
    fn test_clamp() {
        assert_eq!(clamp_rating(9.0), 5.0);
        assert_eq!(clamp_rating(-3.0), 1.0);
        assert_eq!(clamp_rating(3.5), 3.5);
    }

    #[test]
    fn test_parse_ratings() {
        let envelope = GraphEnvelope::from_path_values(vec![
            PathValue::new(path!["titlesById", 9, "userRating"], 9),
            PathValue::new(path!["titlesById", "10", "userRating"], 2.5),
        ])
        .unwrap();

        assert_eq!(parse_ratings(&envelope).unwrap(), vec![(9, 5.0), (10, 2.5)]);
    }

    #[test]
    fn test_parse_rejects_other_paths() {
        let wrong_field =
            GraphEnvelope::from_path_values(vec![PathValue::new(path!["titlesById", 9, "name"], 3)])
                .unwrap();
        assert!(matches!(parse_ratings(&wrong_field), Err(Error::InvalidArgument(..))));

        let not_a_number = GraphEnvelope::from_path_values(vec![PathValue::new(
            path!["titlesById", 9, "userRating"],
            "five",
        )])
        .unwrap();
        assert!(matches!(parse_ratings(&not_a_number), Err(Error::InvalidArgument(..))));

        let bad_id = GraphEnvelope::from_path_values(vec![PathValue::new(
            path!["titlesById", "x", "userRating"],
            3,
        )])
        .unwrap();
        assert!(matches!(parse_ratings(&bad_id), Err(Error::InvalidArgument(..))));
    }
}
