//! Handlers for a small video catalog graph:
//!
//! ```text
//! genrelist[i].name
//! genrelist[i].titles[j]            -> ref titlesById[id]
//! genrelist[i].titles.length
//! genrelist[i].titles.push(ref)
//! genrelist[i].titles.remove(j)
//! titlesById[id][name|year|description|boxshot|rating]
//! titlesById[id].userRating
//! ```
//!
//! Each handler loads through a [`CacheThrough`](crate::CacheThrough) over a
//! [`Coalescer`](crate::Coalescer), so concurrent requests for overlapping
//! ids reach the backend once.

mod genres;
mod ratings;
mod titles;

pub use genres::{Genre, GenreListHandler, GenreQuery, GenreStore};
pub use ratings::{RatingKey, RatingQuery, RatingStore, RatingsHandler};
pub use titles::{Title, TitleQuery, TitlesHandler};

use crate::path::Path;

pub(crate) const TITLES_BY_ID: &str = "titlesById";
pub(crate) const GENRE_LIST: &str = "genrelist";

/// The root path of a title.
pub fn title_path(id: i64) -> Path {
    crate::path![TITLES_BY_ID, id]
}
