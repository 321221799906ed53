use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};

use chrono::Utc;
use itertools::Itertools;

use crate::api::{Book, BookId, NewBook, UserId};
use crate::library_repository::{
    LibraryRepository, LibraryRepositoryError, Reservation, GENRE_RECOMMENDATIONS_LIMIT,
    POPULARITY_WINDOW_DAYS, POPULAR_RECOMMENDATIONS_LIMIT, TOP_GENRES_LIMIT,
};

/// Locks are always taken in the order reservations -> books
pub struct InMemoryLibraryRepository {
    books: parking_lot::RwLock<HashMap<BookId, Book>>,
    reservations: parking_lot::RwLock<Vec<Reservation>>,
    book_sequence_generator: AtomicI32,
    reservation_sequence_generator: AtomicI32,
}

impl Default for InMemoryLibraryRepository {
    fn default() -> Self {
        // Ids start at 1 to match SERIAL columns
        Self {
            books: Default::default(),
            reservations: Default::default(),
            book_sequence_generator: AtomicI32::new(1),
            reservation_sequence_generator: AtomicI32::new(1),
        }
    }
}

fn by_popularity(left: &&Book, right: &&Book) -> CmpOrdering {
    right
        .popularity_score
        .cmp(&left.popularity_score)
        .then_with(|| left.id.cmp(&right.id))
}

fn books_reserved_by(reservations: &[Reservation], user_id: UserId) -> HashSet<BookId> {
    reservations
        .iter()
        .filter(|r| r.user_id == user_id)
        .map(|r| r.book_id)
        .collect()
}

fn popularity_in_window<'a>(
    reservations: impl Iterator<Item = &'a Reservation>,
    book_id: BookId,
) -> Result<i32, LibraryRepositoryError> {
    let window_start = Utc::now() - chrono::Duration::days(i64::from(POPULARITY_WINDOW_DAYS));
    let score = reservations
        .filter(|r| r.book_id == book_id && r.reserved_at >= window_start)
        .count();
    i32::try_from(score)
        .map_err(|_| LibraryRepositoryError::Other("Popularity score overflow".to_string()))
}

impl InMemoryLibraryRepository {
    #[cfg(test)]
    fn backdate_reservation(
        &self,
        reservation_id: crate::api::ReservationId,
        reserved_at: chrono::DateTime<Utc>,
    ) {
        if let Some(reservation) = self
            .reservations
            .write()
            .iter_mut()
            .find(|r| r.id == reservation_id)
        {
            reservation.reserved_at = reserved_at;
        }
    }
}

#[async_trait::async_trait]
impl LibraryRepository for InMemoryLibraryRepository {
    async fn add_book(&self, book: NewBook) -> Result<BookId, LibraryRepositoryError> {
        let id = self.book_sequence_generator.fetch_add(1, Ordering::Relaxed);
        self.books.write().insert(
            id,
            Book {
                id,
                title: book.title,
                genre: book.genre,
                popularity_score: 0,
            },
        );
        Ok(id)
    }

    async fn get_book(&self, book_id: BookId) -> Result<Book, LibraryRepositoryError> {
        self.books
            .read()
            .get(&book_id)
            .cloned()
            .ok_or(LibraryRepositoryError::BookNotFound(book_id))
    }

    async fn recommend_by_genre(&self, user_id: UserId) -> Result<Vec<Book>, LibraryRepositoryError> {
        let reservations = self.reservations.read();
        let books = self.books.read();

        let reserved_by_user = books_reserved_by(&reservations, user_id);

        let preferred_genres: HashSet<&str> = reserved_by_user
            .iter()
            .filter_map(|book_id| books.get(book_id))
            .map(|book| book.genre.as_str())
            .counts()
            .into_iter()
            .sorted_by(|(left_genre, left_count), (right_genre, right_count)| {
                right_count
                    .cmp(left_count)
                    .then_with(|| left_genre.cmp(right_genre))
            })
            .take(TOP_GENRES_LIMIT as usize)
            .map(|(genre, _)| genre)
            .collect();

        Ok(books
            .values()
            .filter(|book| preferred_genres.contains(book.genre.as_str()))
            .filter(|book| !reserved_by_user.contains(&book.id))
            .sorted_by(by_popularity)
            .take(GENRE_RECOMMENDATIONS_LIMIT as usize)
            .cloned()
            .collect())
    }

    async fn recommend_popular(&self, user_id: UserId) -> Result<Vec<Book>, LibraryRepositoryError> {
        let reservations = self.reservations.read();
        let books = self.books.read();

        let reserved_by_user = books_reserved_by(&reservations, user_id);

        Ok(books
            .values()
            .filter(|book| !reserved_by_user.contains(&book.id))
            .sorted_by(by_popularity)
            .take(POPULAR_RECOMMENDATIONS_LIMIT as usize)
            .cloned()
            .collect())
    }

    async fn reserve_book(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> Result<Reservation, LibraryRepositoryError> {
        let mut reservations_lock = self.reservations.write();
        let mut books_lock = self.books.write();

        let book = books_lock
            .get_mut(&book_id)
            .ok_or(LibraryRepositoryError::BookNotFound(book_id))?;

        if reservations_lock
            .iter()
            .any(|r| r.user_id == user_id && r.book_id == book_id)
        {
            return Err(LibraryRepositoryError::BookAlreadyReserved { user_id, book_id });
        }

        let reservation = Reservation {
            id: self
                .reservation_sequence_generator
                .fetch_add(1, Ordering::Relaxed),
            user_id,
            book_id,
            reserved_at: Utc::now(),
        };
        let score = popularity_in_window(
            reservations_lock.iter().chain(std::iter::once(&reservation)),
            book_id,
        )?;

        reservations_lock.push(reservation.clone());
        book.popularity_score = score;
        Ok(reservation)
    }

    async fn recompute_popularity(&self, book_id: BookId) -> Result<i32, LibraryRepositoryError> {
        let reservations = self.reservations.read();
        let score = popularity_in_window(reservations.iter(), book_id)?;

        let mut books = self.books.write();
        let book = books
            .get_mut(&book_id)
            .ok_or(LibraryRepositoryError::BookNotFound(book_id))?;
        book.popularity_score = score;
        Ok(score)
    }

    async fn list_reservations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Reservation>, LibraryRepositoryError> {
        Ok(self
            .reservations
            .read()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}
