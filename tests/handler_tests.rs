//! These tests drive the catalog handlers end to end, over in-memory stores

mod common;

use async_trait::async_trait;
use common::{count, init_logging, sample_genres, title_fetcher, MemoryGenres, MemoryRatings};
use futures::{executor, future};
use graphloader::{
    catalog::{
        Genre, GenreListHandler, GenreQuery, RatingKey, RatingQuery, RatingStore, RatingsHandler,
        Title, TitleQuery, TitlesHandler,
    },
    fetch_fn, path, Config, Error, GraphEnvelope, GraphValue, Handler, Identity, KeySet, Path,
    PathValue, Primitive, Records, Result,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

fn alice() -> Identity {
    Identity::user("alice")
}

fn rating_envelope(values: Vec<(i64, GraphValue)>) -> GraphEnvelope {
    GraphEnvelope::from_path_values(
        values
            .into_iter()
            .map(|(id, value)| PathValue::new(path!["titlesById", id, "userRating"], value)),
    )
    .unwrap()
}

fn genre_handler(store: MemoryGenres) -> GenreListHandler<MemoryGenres> {
    GenreListHandler::new(store, &Config::default())
}

#[test]
fn test_title_fields() {
    init_logging();

    let calls = Arc::new(AtomicUsize::new(0));
    let handler = TitlesHandler::from_config(title_fetcher(&calls), &Config::default());

    let query = TitleQuery::new(vec![523, 829], vec!["name", "year", "rating", "color"]);
    let response = executor::block_on(handler.get(&Identity::anonymous(), &query)).unwrap();

    assert_eq!(response.values.len(), 8);
    assert_eq!(
        response.value_at(&path!["titlesById", 523, "name"]),
        Some(&GraphValue::from("House of Cards"))
    );
    assert_eq!(response.value_at(&path!["titlesById", 523, "year"]), Some(&GraphValue::from(2013)));
    assert_eq!(
        response.value_at(&path!["titlesById", 523, "rating"]),
        Some(&GraphValue::Primitive(Primitive::Float(4.5)))
    );

    // Fields a title doesn't have are known to be absent
    assert_eq!(
        response.value_at(&path!["titlesById", 829, "year"]),
        Some(&GraphValue::undefined())
    );
    assert_eq!(
        response.value_at(&path!["titlesById", 523, "color"]),
        Some(&GraphValue::undefined())
    );
    assert!(response.invalidated.is_empty());
    assert_eq!(count(&calls), 1);
}

#[test]
fn test_missing_title_is_null_atom() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = TitlesHandler::from_config(title_fetcher(&calls), &Config::default());

    let query = TitleQuery::new(vec![999], vec!["year"]);
    let response = executor::block_on(handler.get(&Identity::anonymous(), &query)).unwrap();

    assert_eq!(
        response.values,
        vec![PathValue::new(path!["titlesById", 999], GraphValue::atom_null())]
    );
}

#[test]
fn test_every_requested_title_is_answered() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = TitlesHandler::from_config(title_fetcher(&calls), &Config::default());

    let ids = vec![523, 999, 1001, 523, 4];
    let query = TitleQuery::new(ids.clone(), vec!["name"]);
    let response = executor::block_on(handler.get(&Identity::anonymous(), &query)).unwrap();

    for id in ids {
        let title_path: Path = path!["titlesById", id];
        assert!(
            response.values.iter().any(|value| {
                value.path.is_prefix_of(&title_path) || title_path.is_prefix_of(&value.path)
            }),
            "no value for title {}",
            id
        );
    }

    // Duplicates are fetched and reported once
    assert_eq!(response.values.len(), 4);
    assert_eq!(count(&calls), 1);

    // A second request is answered from the cache
    executor::block_on(handler.get(&Identity::anonymous(), &query)).unwrap();
    assert_eq!(count(&calls), 1);
}

#[test]
fn test_title_backend_failure_is_reported_per_title() {
    let handler = TitlesHandler::new(fetch_fn(|_ids: KeySet<i64>| {
        future::ready(Err::<Records<i64, Title>, Error>(Error::backend(
            "title service unavailable",
        )))
    }));

    let query = TitleQuery::new(vec![1, 2], vec!["name"]);
    let response = executor::block_on(handler.get(&Identity::anonymous(), &query)).unwrap();

    assert_eq!(response.values.len(), 2);
    for id in [1, 2] {
        let value = response.value_at(&path!["titlesById", id]).unwrap();
        assert!(value.is_error(), "{:?}", value);
    }
}

#[test]
fn test_titles_are_read_only() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = TitlesHandler::from_config(title_fetcher(&calls), &Config::default());

    let envelope = GraphEnvelope::from_path_values(vec![PathValue::new(
        path!["titlesById", 523, "name"],
        "New name",
    )])
    .unwrap();

    assert!(matches!(
        executor::block_on(handler.set(&alice(), &envelope)),
        Err(Error::Unsupported(..))
    ));
    assert!(matches!(
        executor::block_on(handler.call(&alice(), &path!["titlesById", 523, "rename"], &[])),
        Err(Error::Unsupported(..))
    ));
}

#[test]
fn test_set_then_get_rating() {
    init_logging();

    let handler = RatingsHandler::new(MemoryRatings::default(), &Config::default());

    let envelope = rating_envelope(vec![(523, GraphValue::from(9))]);
    let response = executor::block_on(handler.set(&alice(), &envelope)).unwrap();

    // Ratings are clamped to the 1 to 5 range
    let rating_path = path!["titlesById", 523, "userRating"];
    assert_eq!(response.value_at(&rating_path), Some(&GraphValue::from(5)));
    assert_eq!(handler.store().rating("alice", 523), Some(5.0));
    assert_eq!(count(&handler.store().writes), 1);

    let response = executor::block_on(handler.get(&alice(), &RatingQuery::new(vec![523]))).unwrap();
    assert_eq!(response.values, vec![PathValue::new(rating_path, 5)]);

    // The write went through to the cache, so the store was never read
    assert_eq!(count(&handler.store().reads), 0);
}

#[test]
fn test_ratings_are_per_user() {
    let store = MemoryRatings::default()
        .with_rating("alice", 523, 4.0)
        .with_rating("bob", 523, 2.0);
    let handler = RatingsHandler::new(store, &Config::default());

    let query = RatingQuery::new(vec![523, 829]);
    let rating_path = path!["titlesById", 523, "userRating"];

    let response = executor::block_on(handler.get(&alice(), &query)).unwrap();
    assert_eq!(response.value_at(&rating_path), Some(&GraphValue::from(4)));

    // Unrated titles are known to have no rating
    assert_eq!(
        response.value_at(&path!["titlesById", 829, "userRating"]),
        Some(&GraphValue::atom_null())
    );

    let response = executor::block_on(handler.get(&Identity::user("bob"), &query)).unwrap();
    assert_eq!(response.value_at(&rating_path), Some(&GraphValue::from(2)));

    // Anonymous callers have no ratings, and don't touch the store
    let reads = count(&handler.store().reads);
    let response = executor::block_on(handler.get(&Identity::anonymous(), &query)).unwrap();
    assert_eq!(response.values.len(), 2);
    assert!(response.values.iter().all(|value| value.value == GraphValue::atom_null()));
    assert_eq!(count(&handler.store().reads), reads);
}

/// A rating store that is down for reads
struct UnavailableRatings;

#[async_trait]
impl RatingStore for UnavailableRatings {
    async fn get_ratings(&self, _keys: KeySet<RatingKey>) -> Result<Records<RatingKey, f64>> {
        Err(Error::backend("ratings unavailable"))
    }

    async fn set_ratings(
        &self,
        _user: &str,
        _ratings: Vec<(i64, f64)>,
    ) -> Result<Records<i64, f64>> {
        Err(Error::backend("ratings unavailable"))
    }
}

#[test]
fn test_rating_failure_is_reported_at_the_rating() {
    let handler = RatingsHandler::new(UnavailableRatings, &Config::default());

    let query = RatingQuery::new(vec![523, 829]);
    let response = executor::block_on(handler.get(&alice(), &query)).unwrap();

    assert_eq!(response.values.len(), 2);
    for id in [523, 829] {
        let value = response.value_at(&path!["titlesById", id, "userRating"]).unwrap();
        assert!(value.is_error(), "{:?}", value);

        // The title itself is left alone
        assert_eq!(response.value_at(&path!["titlesById", id]), None);
    }
}

#[test]
fn test_unauthorized_rating_write() {
    let handler = RatingsHandler::new(MemoryRatings::default(), &Config::default());
    let envelope = rating_envelope(vec![(523, GraphValue::from(3))]);

    let result = executor::block_on(handler.set(&Identity::anonymous(), &envelope));
    assert_eq!(result, Err(Error::Unauthorized));
    assert_eq!(count(&handler.store().writes), 0);
    assert!(handler.store().ratings.lock().is_empty());
}

#[test]
fn test_custom_authorizer() {
    let handler = RatingsHandler::new(MemoryRatings::default(), &Config::default())
        .with_authorizer(|identity: &Identity| identity.user_id() == Some("admin"));
    let envelope = rating_envelope(vec![(523, GraphValue::from(3))]);

    let result = executor::block_on(handler.set(&alice(), &envelope));
    assert_eq!(result, Err(Error::Unauthorized));

    executor::block_on(handler.set(&Identity::user("admin"), &envelope)).unwrap();
    assert_eq!(handler.store().rating("admin", 523), Some(3.0));
}

#[test]
fn test_invalid_rating_write() {
    let handler = RatingsHandler::new(MemoryRatings::default(), &Config::default());

    let envelope = rating_envelope(vec![(523, GraphValue::from("great"))]);
    let result = executor::block_on(handler.set(&alice(), &envelope));
    assert!(matches!(result, Err(Error::InvalidArgument(..))));

    let envelope =
        GraphEnvelope::from_path_values(vec![PathValue::new(path!["titlesById", 523, "name"], 3)])
            .unwrap();
    let result = executor::block_on(handler.set(&alice(), &envelope));
    assert!(matches!(result, Err(Error::InvalidArgument(..))));

    assert_eq!(count(&handler.store().writes), 0);

    // Nothing to set is not an error
    let response = executor::block_on(handler.set(&alice(), &GraphEnvelope::new())).unwrap();
    assert!(response.values.is_empty());
    assert_eq!(count(&handler.store().writes), 0);
}

#[test]
fn test_genre_names() {
    let handler = genre_handler(MemoryGenres::default().with_list("alice", sample_genres()));

    let query = GenreQuery::Genres {
        indices: vec![0, 1, 5],
        fields: vec!["name".into()],
    };
    let response = executor::block_on(handler.get(&alice(), &query)).unwrap();

    assert_eq!(
        response.value_at(&path!["genrelist", 0, "name"]),
        Some(&GraphValue::from("Thrillers"))
    );
    assert_eq!(
        response.value_at(&path!["genrelist", 1, "name"]),
        Some(&GraphValue::from("Comedies"))
    );
    assert_eq!(response.value_at(&path!["genrelist", 5]), Some(&GraphValue::atom_null()));
}

#[test]
fn test_genre_titles_are_references() {
    let handler = genre_handler(MemoryGenres::default().with_list("alice", sample_genres()));

    let query = GenreQuery::Titles {
        indices: vec![0],
        title_indices: vec![0, 1, 7, -1],
    };
    let response = executor::block_on(handler.get(&alice(), &query)).unwrap();

    assert_eq!(
        response.value_at(&path!["genrelist", 0, "titles", 0]),
        Some(&GraphValue::reference(path!["titlesById", 523]))
    );
    assert_eq!(
        response.value_at(&path!["genrelist", 0, "titles", 1]),
        Some(&GraphValue::reference(path!["titlesById", 829]))
    );
    assert_eq!(
        response.value_at(&path!["genrelist", 0, "titles", 7]),
        Some(&GraphValue::atom_null())
    );
    assert_eq!(
        response.value_at(&path!["genrelist", 0, "titles", -1]),
        Some(&GraphValue::atom_null())
    );
}

#[test]
fn test_anonymous_genre_list() {
    let shared = vec![Genre::new("Popular", vec![1001])];
    let handler = genre_handler(MemoryGenres::default().with_list("all", shared));

    let query = GenreQuery::Length { indices: vec![0] };
    let response = executor::block_on(handler.get(&Identity::anonymous(), &query)).unwrap();
    assert_eq!(
        response.values,
        vec![PathValue::new(path!["genrelist", 0, "titles", "length"], 1)]
    );

    // A user with no list of their own gets nothing at all
    let response = executor::block_on(handler.get(&alice(), &query)).unwrap();
    assert_eq!(
        response.values,
        vec![PathValue::new(path!["genrelist"], GraphValue::atom_null())]
    );
}

#[test]
fn test_push_title() {
    init_logging();

    let handler = genre_handler(MemoryGenres::default().with_list("alice", sample_genres()));
    let length_query = GenreQuery::Length { indices: vec![0] };
    let length_path = path!["genrelist", 0, "titles", "length"];

    let response = executor::block_on(handler.get(&alice(), &length_query)).unwrap();
    assert_eq!(response.value_at(&length_path), Some(&GraphValue::from(3)));
    assert_eq!(count(&handler.store().reads), 1);

    let response = executor::block_on(handler.call(
        &alice(),
        &path!["genrelist", 0, "titles", "push"],
        &[GraphValue::reference(path!["titlesById", 829])],
    ))
    .unwrap();

    assert_eq!(
        response.value_at(&path!["genrelist", 0, "titles", 3]),
        Some(&GraphValue::reference(path!["titlesById", 829]))
    );
    assert_eq!(response.value_at(&length_path), Some(&GraphValue::from(4)));
    assert_eq!(handler.store().list("alice").unwrap()[0].titles, vec![523, 829, 1001, 829]);

    // The updated list was written through to the cache
    let response = executor::block_on(handler.get(&alice(), &length_query)).unwrap();
    assert_eq!(response.value_at(&length_path), Some(&GraphValue::from(4)));
    assert_eq!(count(&handler.store().reads), 1);
}

#[test]
fn test_remove_title() {
    let handler = genre_handler(MemoryGenres::default().with_list("alice", sample_genres()));

    let response = executor::block_on(handler.call(
        &alice(),
        &path!["genrelist", 1, "titles", "remove"],
        &[GraphValue::from(1)],
    ))
    .unwrap();

    // Positions 1 and 2 have shifted or gone
    let invalidated: Vec<Path> =
        vec![path!["genrelist", 1, "titles", 1], path!["genrelist", 1, "titles", 2]];
    assert_eq!(response.invalidated, invalidated);
    assert_eq!(
        response.values,
        vec![PathValue::new(path!["genrelist", 1, "titles", "length"], 2)]
    );
    assert_eq!(handler.store().list("alice").unwrap()[1].titles, vec![829, 523]);

    let query = GenreQuery::Titles {
        indices: vec![1],
        title_indices: vec![1],
    };
    let response = executor::block_on(handler.get(&alice(), &query)).unwrap();
    assert_eq!(
        response.value_at(&path!["genrelist", 1, "titles", 1]),
        Some(&GraphValue::reference(path!["titlesById", 523]))
    );
}

#[test]
fn test_unauthorized_genre_mutation() {
    let handler = genre_handler(MemoryGenres::default().with_list("alice", sample_genres()));

    let result = executor::block_on(handler.call(
        &Identity::anonymous(),
        &path!["genrelist", 0, "titles", "push"],
        &[GraphValue::reference(path!["titlesById", 829])],
    ));

    assert_eq!(result, Err(Error::Unauthorized));
    assert_eq!(count(&handler.store().writes), 0);
    assert_eq!(handler.store().list("alice"), Some(sample_genres()));
}

#[test]
fn test_invalid_genre_calls() {
    let handler = genre_handler(MemoryGenres::default().with_list("alice", sample_genres()));

    let sort = path!["genrelist", 0, "titles", "sort"];
    let result = executor::block_on(handler.call(&alice(), &sort, &[]));
    assert!(matches!(result, Err(Error::Unsupported(..))));

    let result = executor::block_on(handler.call(
        &alice(),
        &path!["genrelist", 0, "titles", "push"],
        &[GraphValue::from(829)],
    ));
    assert!(matches!(result, Err(Error::InvalidArgument(..))));
    assert_eq!(count(&handler.store().writes), 0);

    // The store rejects positions past the end of the genre
    let result = executor::block_on(handler.call(
        &alice(),
        &path!["genrelist", 0, "titles", "remove"],
        &[GraphValue::from(10)],
    ));
    assert!(matches!(result, Err(Error::InvalidArgument(..))));
    assert_eq!(handler.store().list("alice"), Some(sample_genres()));
}

#[test]
fn test_genre_store_counts_reads() {
    let handler = genre_handler(MemoryGenres::default().with_list("alice", sample_genres()));
    let query = GenreQuery::Length { indices: vec![0, 1] };

    let (left, right) = executor::block_on(future::join(
        handler.get(&alice(), &query),
        handler.get(&alice(), &query),
    ));

    assert_eq!(left.unwrap(), right.unwrap());
    assert_eq!(handler.store().reads.load(Ordering::SeqCst), 1);
}

/// A query that names no fields or positions would leave found entities
/// with nothing in the response, so it is turned away before any fetch
#[test]
fn test_empty_selections_are_rejected() {
    let calls = Arc::new(AtomicUsize::new(0));
    let titles = TitlesHandler::from_config(title_fetcher(&calls), &Config::default());

    let query = TitleQuery::new(vec![523, 999], Vec::<&str>::new());
    let result = executor::block_on(titles.get(&Identity::anonymous(), &query));
    assert!(matches!(result, Err(Error::InvalidArgument(..))));
    assert_eq!(count(&calls), 0);

    let genres = genre_handler(MemoryGenres::default().with_list("alice", sample_genres()));

    let query = GenreQuery::Titles {
        indices: vec![0],
        title_indices: vec![],
    };
    let result = executor::block_on(genres.get(&alice(), &query));
    assert!(matches!(result, Err(Error::InvalidArgument(..))));

    let query = GenreQuery::Genres {
        indices: vec![0],
        fields: vec![],
    };
    let result = executor::block_on(genres.get(&alice(), &query));
    assert!(matches!(result, Err(Error::InvalidArgument(..))));
    assert_eq!(count(&genres.store().reads), 0);

    // Selecting nothing but lengths is fine
    let query = GenreQuery::Length { indices: vec![0] };
    executor::block_on(genres.get(&alice(), &query)).unwrap();
}
