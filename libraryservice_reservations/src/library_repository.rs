pub use in_memory_library_repository::InMemoryLibraryRepository;
pub use postgres_library_repository::PostgresLibraryRepository;

use chrono::{DateTime, Utc};

use crate::api::{Book, BookId, NewBook, ReservationId, ReservationRecord, UserId};

mod in_memory_library_repository;
mod postgres_library_repository;

/// Number of the user's most reserved genres used for genre recommendations
pub const TOP_GENRES_LIMIT: i64 = 3;
pub const GENRE_RECOMMENDATIONS_LIMIT: i64 = 10;
pub const POPULAR_RECOMMENDATIONS_LIMIT: i64 = 5;
/// Only reservations younger than this count towards the popularity score
pub const POPULARITY_WINDOW_DAYS: i32 = 30;

#[derive(Debug, thiserror::Error)]
pub enum LibraryRepositoryError {
    #[error("Book {0} not found")]
    BookNotFound(BookId),

    #[error("Book {book_id} already reserved by user {user_id}")]
    BookAlreadyReserved { user_id: UserId, book_id: BookId },

    #[error("Database failure {0}")]
    DatabaseFailure(#[from] tokio_postgres::Error),

    #[error("Other error {0}")]
    Other(String),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Reservation {
    pub id: ReservationId,
    pub user_id: UserId,
    pub book_id: BookId,
    pub reserved_at: DateTime<Utc>,
}

impl From<Reservation> for ReservationRecord {
    fn from(reservation: Reservation) -> Self {
        ReservationRecord {
            reservation_id: reservation.id,
            book_id: reservation.book_id,
            reserved_at: reservation.reserved_at.timestamp(),
        }
    }
}

#[async_trait::async_trait]
pub trait LibraryRepository: Send + Sync {
    /// Adds book to the library, returns an id assigned to the book
    async fn add_book(&self, book: NewBook) -> Result<BookId, LibraryRepositoryError>;

    async fn get_book(&self, book_id: BookId) -> Result<Book, LibraryRepositoryError>;

    /// Books from the user's top genres that the user has not reserved yet,
    /// most popular first, ties broken by lowest id
    async fn recommend_by_genre(&self, user_id: UserId)
        -> Result<Vec<Book>, LibraryRepositoryError>;

    /// Most popular books the user has not reserved yet, ties broken by lowest id
    async fn recommend_popular(&self, user_id: UserId)
        -> Result<Vec<Book>, LibraryRepositoryError>;

    /// Atomically records a reservation and refreshes the popularity score of the book,
    /// fails with BookAlreadyReserved if the user already holds a reservation for the book.
    /// Either both changes are stored or neither is.
    async fn reserve_book(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> Result<Reservation, LibraryRepositoryError>;

    /// Overwrites the popularity score of the book with the number of its
    /// reservations within the popularity window, returns the new score
    async fn recompute_popularity(&self, book_id: BookId) -> Result<i32, LibraryRepositoryError>;

    async fn list_reservations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Reservation>, LibraryRepositoryError>;
}
