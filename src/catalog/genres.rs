use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{title_path, GENRE_LIST, TITLES_BY_ID};
use crate::batch::Coalescer;
use crate::cache::CacheThrough;
use crate::config::Config;
use crate::data::{KeySet, Record, Records};
use crate::envelope::GraphResponse;
use crate::error::{Error, Result};
use crate::fetcher::Fetcher;
use crate::handler::{authorize, Authorizer, Handler, Identity, RequireUser};
use crate::path::{Path, PathKey};
use crate::resolve::{record_for, resolve_fields, resolve_index, settle, Fields};
use crate::value::{GraphValue, PathValue, Primitive};

/// The list served to callers with no identity.
const SHARED_LIST: &str = "all";

const TITLES: &str = "titles";
const LENGTH: &str = "length";
const PUSH: &str = "push";
const REMOVE: &str = "remove";

/// One row of a user's recommendations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub name: String,

    /// Ids of the titles in this genre, in display order.
    #[serde(default)]
    pub titles: Vec<i64>,
}

impl Genre {
    pub fn new(name: impl Into<String>, titles: impl IntoIterator<Item = i64>) -> Self {
        Genre {
            name: name.into(),
            titles: titles.into_iter().collect(),
        }
    }
}

impl Fields for Genre {
    fn field(&self, name: &PathKey) -> Option<GraphValue> {
        match name.as_str()? {
            "name" => Some(self.name.as_str().into()),
            _ => None,
        }
    }
}

/// Storage for per-user genre lists.
#[async_trait]
pub trait GenreStore: Send + Sync + 'static {
    /// Look up the genre lists of some users.
    async fn genre_lists(&self, users: KeySet<String>) -> Result<Records<String, Vec<Genre>>>;

    /// Append a title to one genre of a user's list, returning the whole
    /// updated list.
    async fn push_title(&self, user: &str, genre: usize, title: i64) -> Result<Vec<Genre>>;

    /// Remove the title at `index` from one genre of a user's list, shifting
    /// the titles after it down, and return the whole updated list.
    async fn remove_title(&self, user: &str, genre: usize, index: usize) -> Result<Vec<Genre>>;
}

struct GenreReads<S>(Arc<S>);

#[async_trait]
impl<S: GenreStore> Fetcher for GenreReads<S> {
    type Key = String;
    type Value = Vec<Genre>;

    async fn fetch(&self, users: KeySet<String>) -> Result<Records<String, Vec<Genre>>> {
        self.0.genre_lists(users).await
    }
}

/// The parts of `genrelist` that can be read.
#[derive(Debug, Clone, PartialEq)]
pub enum GenreQuery {
    /// `genrelist[indices][fields]`
    Genres { indices: Vec<i64>, fields: Vec<PathKey> },

    /// `genrelist[indices].titles[title_indices]`
    Titles { indices: Vec<i64>, title_indices: Vec<i64> },

    /// `genrelist[indices].titles.length`
    Length { indices: Vec<i64> },
}

enum ListCall {
    Push,
    Remove,
}

fn genre_path(index: i64) -> Path {
    crate::path![GENRE_LIST, index]
}

fn titles_path(index: i64) -> Path {
    genre_path(index).child(TITLES)
}

fn genre_at(list: &[Genre], index: i64) -> Option<&Genre> {
    usize::try_from(index).ok().and_then(|index| list.get(index))
}

/// `genrelist[i].titles.push` or `genrelist[i].titles.remove`
fn parse_call_path(path: &Path) -> Option<(i64, ListCall)> {
    match path.keys() {
        [root, index, titles, method]
            if root.as_str() == Some(GENRE_LIST) && titles.as_str() == Some(TITLES) =>
        {
            let call = match method.as_str()? {
                PUSH => ListCall::Push,
                REMOVE => ListCall::Remove,
                _ => return None,
            };
            Some((index.as_index()?, call))
        }
        _ => None,
    }
}

fn genre_position(index: i64) -> Result<usize> {
    usize::try_from(index)
        .map_err(|_| Error::invalid_argument(format!("{} is not a genre index", index)))
}

// The only argument of push: a reference to titlesById[id]
fn parse_push_args(args: &[GraphValue]) -> Result<i64> {
    let target = match args {
        [GraphValue::Ref(target)] => target,
        _ => return Err(Error::invalid_argument("push takes a single reference to a title")),
    };

    match target.keys() {
        [root, id] if root.as_str() == Some(TITLES_BY_ID) => id.as_index(),
        _ => None,
    }
    .ok_or_else(|| Error::invalid_argument(format!("{} is not a reference to a title", target)))
}

// The only argument of remove: a non-negative integer index
fn parse_remove_args(args: &[GraphValue]) -> Result<usize> {
    match args {
        [GraphValue::Primitive(Primitive::Integer(index))] => usize::try_from(*index).ok(),
        _ => None,
    }
    .ok_or_else(|| Error::invalid_argument("remove takes a single non-negative index"))
}

// A query that would leave a found genre with no path values is rejected
// before anything is fetched.
fn check_query(query: &GenreQuery) -> Result<()> {
    match query {
        GenreQuery::Genres { fields, .. } if fields.is_empty() => {
            Err(Error::invalid_argument("a genre query needs at least one field"))
        }
        GenreQuery::Titles { title_indices, .. } if title_indices.is_empty() => {
            Err(Error::invalid_argument("a genre titles query needs at least one index"))
        }
        _ => Ok(()),
    }
}

/// Serves the caller's genre list: genre names, the titles in each genre
/// as references into `titlesById`, and the number of titles per genre.
///
/// Lists are read through a cache keyed by user. Pushing and removing
/// titles require authorization, go to the store, and write the updated
/// list through to the cache.
pub struct GenreListHandler<S: GenreStore> {
    store: Arc<S>,
    lists: CacheThrough<Coalescer<GenreReads<S>>>,
    authorizer: Box<dyn Authorizer>,
}

impl<S: GenreStore> GenreListHandler<S> {
    pub fn new(store: S, config: &Config) -> Self {
        let store = Arc::new(store);
        GenreListHandler {
            lists: config.build(GenreReads(store.clone())),
            store,
            authorizer: Box::new(RequireUser),
        }
    }

    /// Replace the check run before mutations. The default allows any
    /// identified user.
    pub fn with_authorizer(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizer = Box::new(authorizer);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The cached list for a user, if there is one.
    pub fn cached(&self, user: &str) -> Option<Record<Vec<Genre>>> {
        self.lists.get(&user.to_owned())
    }

    fn updated(&self, user: &str, list: &[Genre], genre: usize) -> Result<usize> {
        self.lists.insert(user.to_owned(), Record::Found(list.to_vec()));

        list.get(genre)
            .map(|genre| genre.titles.len())
            .ok_or_else(|| Error::backend(format!("updated genre list has no genre {}", genre)))
    }

    async fn push(&self, user: &str, genre: i64, args: &[GraphValue]) -> Result<GraphResponse> {
        let position = genre_position(genre)?;
        let title = parse_push_args(args)?;

        debug!(user, genre, title, "pushing title onto genre");
        let list = self.store.push_title(user, position, title).await?;
        let length = self.updated(user, &list, position)?;
        let last = length
            .checked_sub(1)
            .ok_or_else(|| Error::backend(format!("genre {} is empty after a push", genre)))?;

        let mut response = GraphResponse::new();
        response.push(titles_path(genre).child(last), GraphValue::reference(title_path(title)));
        response.push(titles_path(genre).child(LENGTH), length);
        Ok(response)
    }

    async fn remove(&self, user: &str, genre: i64, args: &[GraphValue]) -> Result<GraphResponse> {
        let position = genre_position(genre)?;
        let index = parse_remove_args(args)?;

        debug!(user, genre, index, "removing title from genre");
        let list = self.store.remove_title(user, position, index).await?;
        let length = self.updated(user, &list, position)?;

        // Everything from the removed position to the old end has moved or
        // gone.
        let mut response = GraphResponse::new();
        for shifted in index..=length {
            response.invalidate(titles_path(genre).child(shifted));
        }
        response.push(titles_path(genre).child(LENGTH), length);
        Ok(response)
    }
}

#[async_trait]
impl<S: GenreStore> Handler for GenreListHandler<S> {
    type Query = GenreQuery;

    async fn get(&self, identity: &Identity, query: &GenreQuery) -> Result<GraphResponse> {
        check_query(query)?;

        let user = identity.user_id().unwrap_or(SHARED_LIST).to_owned();
        let keys: KeySet<String> = Some(user.clone()).into_iter().collect();
        let records = settle(&keys, self.lists.fetch(keys.clone()).await)?;

        let list = match record_for(&records, &user) {
            Record::Found(list) => list,
            Record::NotFound => {
                return Ok(Some(PathValue::new(crate::path![GENRE_LIST], GraphValue::atom_null()))
                    .into_iter()
                    .collect())
            }
            Record::Error(err) => {
                return Ok(Some(PathValue::new(crate::path![GENRE_LIST], GraphValue::error(err)))
                    .into_iter()
                    .collect())
            }
        };

        let mut response = GraphResponse::new();
        match query {
            GenreQuery::Genres { indices, fields } => {
                for &index in indices {
                    let record: Record<Genre> = genre_at(&list, index).cloned().into();
                    response.extend(resolve_fields(&genre_path(index), fields, &record));
                }
            }
            GenreQuery::Titles { indices, title_indices } => {
                for &index in indices {
                    let genre = match genre_at(&list, index) {
                        Some(genre) => genre,
                        None => {
                            response.push(genre_path(index), GraphValue::atom_null());
                            continue;
                        }
                    };

                    for &title_index in title_indices {
                        response.values.push(resolve_index(
                            &titles_path(index),
                            title_index,
                            &genre.titles,
                            |id| GraphValue::reference(title_path(*id)),
                        ));
                    }
                }
            }
            GenreQuery::Length { indices } => {
                for &index in indices {
                    match genre_at(&list, index) {
                        Some(genre) => {
                            response.push(titles_path(index).child(LENGTH), genre.titles.len())
                        }
                        None => response.push(genre_path(index), GraphValue::atom_null()),
                    }
                }
            }
        }

        Ok(response)
    }

    async fn call(
        &self,
        identity: &Identity,
        path: &Path,
        args: &[GraphValue],
    ) -> Result<GraphResponse> {
        let (genre, call) =
            parse_call_path(path).ok_or_else(|| Error::Unsupported(format!("call {}", path)))?;
        let user = authorize(&*self.authorizer, identity)?;

        match call {
            ListCall::Push => self.push(user, genre, args).await,
            ListCall::Remove => self.remove(user, genre, args).await,
        }
    }
}
