//! In-memory backends shared by the integration tests
#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use graphloader::{
    catalog::{Genre, GenreStore, RatingKey, RatingStore, Title},
    fetch_fn, Error, Fetcher, KeySet, Records, Result,
};
use parking_lot::Mutex;

/// Send tracing output to the test harness. Safe to call from every test.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// The title table used across the handler tests
pub fn title_table() -> HashMap<i64, Title> {
    let mut table = HashMap::new();

    table.insert(
        523,
        Title {
            name: "House of Cards".to_owned(),
            year: Some(2013),
            description: Some("A congressman works with his wife to exact revenge".to_owned()),
            boxshot: Some("http://example.com/hoc.jpg".to_owned()),
            rating: Some(4.5),
        },
    );
    table.insert(829, Title::new("Orange is the New Black"));
    table.insert(
        1001,
        Title {
            year: Some(2011),
            ..Title::new("Black Mirror")
        },
    );

    table
}

/// A title fetcher over `title_table`, counting how many times it is called
pub fn title_fetcher(calls: &Arc<AtomicUsize>) -> impl Fetcher<Key = i64, Value = Title> {
    let table = Arc::new(title_table());
    let calls = calls.clone();

    fetch_fn(move |ids: KeySet<i64>| {
        calls.fetch_add(1, Ordering::SeqCst);
        let found: Vec<(i64, Title)> = ids
            .keys()
            .filter_map(|id| table.get(id).map(|title| (*id, title.clone())))
            .collect();

        async move { Ok::<_, Error>(ids.records_from_iter(found)) }
    })
}

#[derive(Debug, Default)]
pub struct MemoryRatings {
    pub ratings: Mutex<HashMap<RatingKey, f64>>,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl MemoryRatings {
    pub fn with_rating(self, user: &str, id: i64, rating: f64) -> Self {
        self.ratings.lock().insert((user.to_owned(), id), rating);
        self
    }

    pub fn rating(&self, user: &str, id: i64) -> Option<f64> {
        self.ratings.lock().get(&(user.to_owned(), id)).copied()
    }
}

#[async_trait]
impl RatingStore for MemoryRatings {
    async fn get_ratings(&self, keys: KeySet<RatingKey>) -> Result<Records<RatingKey, f64>> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let ratings = self.ratings.lock();
        let found: Vec<(RatingKey, f64)> = keys
            .keys()
            .filter_map(|key| ratings.get(key).map(|rating| (key.clone(), *rating)))
            .collect();
        drop(ratings);

        Ok(keys.records_from_iter(found))
    }

    async fn set_ratings(&self, user: &str, ratings: Vec<(i64, f64)>) -> Result<Records<i64, f64>> {
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut stored = self.ratings.lock();
        for &(id, rating) in &ratings {
            stored.insert((user.to_owned(), id), rating);
        }
        drop(stored);

        let ids: KeySet<i64> = ratings.iter().map(|&(id, _rating)| id).collect();
        Ok(ids.records_from_iter(ratings))
    }
}

#[derive(Debug, Default)]
pub struct MemoryGenres {
    pub lists: Mutex<HashMap<String, Vec<Genre>>>,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl MemoryGenres {
    pub fn with_list(self, user: &str, list: Vec<Genre>) -> Self {
        self.lists.lock().insert(user.to_owned(), list);
        self
    }

    pub fn list(&self, user: &str) -> Option<Vec<Genre>> {
        self.lists.lock().get(user).cloned()
    }

    fn update(
        &self,
        user: &str,
        genre: usize,
        edit: impl FnOnce(&mut Vec<i64>) -> Result<()>,
    ) -> Result<Vec<Genre>> {
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut lists = self.lists.lock();
        let list = lists.get_mut(user).ok_or(Error::NotFound)?;
        let titles = &mut list
            .get_mut(genre)
            .ok_or_else(|| Error::invalid_argument(format!("no genre {}", genre)))?
            .titles;

        edit(titles)?;
        Ok(list.clone())
    }
}

#[async_trait]
impl GenreStore for MemoryGenres {
    async fn genre_lists(&self, users: KeySet<String>) -> Result<Records<String, Vec<Genre>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let lists = self.lists.lock();
        let found: Vec<(String, Vec<Genre>)> = users
            .keys()
            .filter_map(|user| lists.get(user).map(|list| (user.clone(), list.clone())))
            .collect();
        drop(lists);

        Ok(users.records_from_iter(found))
    }

    async fn push_title(&self, user: &str, genre: usize, title: i64) -> Result<Vec<Genre>> {
        self.update(user, genre, |titles| {
            titles.push(title);
            Ok(())
        })
    }

    async fn remove_title(&self, user: &str, genre: usize, index: usize) -> Result<Vec<Genre>> {
        self.update(user, genre, |titles| {
            if index >= titles.len() {
                return Err(Error::invalid_argument(format!("no title at {}", index)));
            }
            titles.remove(index);
            Ok(())
        })
    }
}

/// Two genres of three titles each
pub fn sample_genres() -> Vec<Genre> {
    vec![
        Genre::new("Thrillers", vec![523, 829, 1001]),
        Genre::new("Comedies", vec![829, 1001, 523]),
    ]
}
