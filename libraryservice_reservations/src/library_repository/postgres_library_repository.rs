use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row, Statement};

use crate::api::{Book, BookId, NewBook, UserId};
use crate::library_repository::{
    LibraryRepository, LibraryRepositoryError, Reservation, GENRE_RECOMMENDATIONS_LIMIT,
    POPULARITY_WINDOW_DAYS, POPULAR_RECOMMENDATIONS_LIMIT, TOP_GENRES_LIMIT,
};
use crate::settings::DatabaseSettings;

pub struct PostgresLibraryRepository {
    client: Client,
}

fn book_from_row(row: &Row) -> Result<Book, LibraryRepositoryError> {
    Ok(Book {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        genre: row.try_get("genre")?,
        popularity_score: row.try_get("popularity_score")?,
    })
}

fn is_violation(err: &tokio_postgres::Error, state: &SqlState) -> bool {
    err.as_db_error()
        .map(|db_err| db_err.code() == state)
        .unwrap_or_default()
}

impl PostgresLibraryRepository {
    pub async fn init(settings: &DatabaseSettings) -> anyhow::Result<Self> {
        tracing::info!(
            "Connecting to postgres at {}:{}/{}",
            settings.hostname,
            settings.port,
            settings.database_name
        );
        let (client, connection) = settings
            .pg_config()
            .connect(NoTls)
            .await
            .context("Failed to connect to postgres")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Postgres connection error: {}", e);
            }
        });

        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS books (
            id                  SERIAL PRIMARY KEY,
            title               TEXT NOT NULL,
            genre               TEXT NOT NULL,
            popularity_score    INTEGER NOT NULL DEFAULT 0
            )
        ",
            )
            .await
            .context("Failed to setup books table")?;

        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS reservations (
            id                  SERIAL PRIMARY KEY,
            id_user             INTEGER NOT NULL,
            id_book             INTEGER NOT NULL REFERENCES books (id),
            date_reservation    TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        ",
            )
            .await
            .context("Failed to setup reservations table")?;

        // Uniqueness of (user, book) is what makes reserve_book atomic
        client
            .batch_execute(
                "
        CREATE UNIQUE INDEX IF NOT EXISTS reservations_user_book_idx
            ON reservations (id_user, id_book);
        CREATE INDEX IF NOT EXISTS reservations_book_date_idx
            ON reservations (id_book, date_reservation);
        ",
            )
            .await
            .context("Failed to setup reservations indexes")?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl LibraryRepository for PostgresLibraryRepository {
    async fn add_book(&self, book: NewBook) -> Result<BookId, LibraryRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("INSERT INTO books (title, genre) VALUES ($1, $2) RETURNING id")
            .await?;

        let rows = self
            .client
            .query(&stmt, &[&book.title, &book.genre])
            .await?;

        let book_id: BookId = rows
            .first()
            .ok_or_else(|| LibraryRepositoryError::Other("Id not returned".to_string()))?
            .try_get(0)?;

        Ok(book_id)
    }

    async fn get_book(&self, book_id: BookId) -> Result<Book, LibraryRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("SELECT id, title, genre, popularity_score FROM books WHERE id = $1")
            .await?;

        let rows = self.client.query(&stmt, &[&book_id]).await?;

        book_from_row(
            rows.first()
                .ok_or(LibraryRepositoryError::BookNotFound(book_id))?,
        )
    }

    async fn recommend_by_genre(&self, user_id: UserId) -> Result<Vec<Book>, LibraryRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "
        WITH preferred_genres AS (
            SELECT b.genre, COUNT(*) AS reservations_count
            FROM reservations r
            INNER JOIN books b ON r.id_book = b.id
            WHERE r.id_user = $1
            GROUP BY b.genre
            ORDER BY reservations_count DESC, b.genre ASC
            LIMIT $2
        )
        SELECT b.id, b.title, b.genre, b.popularity_score
        FROM books b
        INNER JOIN preferred_genres pg ON b.genre = pg.genre
        WHERE NOT EXISTS (
            SELECT 1 FROM reservations r WHERE r.id_user = $1 AND r.id_book = b.id
        )
        ORDER BY b.popularity_score DESC, b.id ASC
        LIMIT $3
        ",
            )
            .await?;

        let rows = self
            .client
            .query(
                &stmt,
                &[&user_id, &TOP_GENRES_LIMIT, &GENRE_RECOMMENDATIONS_LIMIT],
            )
            .await?;

        rows.iter().map(book_from_row).collect()
    }

    async fn recommend_popular(&self, user_id: UserId) -> Result<Vec<Book>, LibraryRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "
        SELECT b.id, b.title, b.genre, b.popularity_score
        FROM books b
        WHERE NOT EXISTS (
            SELECT 1 FROM reservations r WHERE r.id_user = $1 AND r.id_book = b.id
        )
        ORDER BY b.popularity_score DESC, b.id ASC
        LIMIT $2
        ",
            )
            .await?;

        let rows = self
            .client
            .query(&stmt, &[&user_id, &POPULAR_RECOMMENDATIONS_LIMIT])
            .await?;

        rows.iter().map(book_from_row).collect()
    }

    async fn reserve_book(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> Result<Reservation, LibraryRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "
        WITH inserted AS (
            INSERT INTO reservations (id_user, id_book) VALUES ($1, $2)
            RETURNING id, date_reservation
        ), refreshed AS (
            UPDATE books
            SET popularity_score = (
                SELECT COUNT(*)::INTEGER
                FROM reservations
                WHERE id_book = $2
                AND date_reservation >= NOW() - make_interval(days => $3)
            ) + 1
            WHERE id = $2
            RETURNING popularity_score
        )
        SELECT inserted.id, inserted.date_reservation
        FROM inserted CROSS JOIN refreshed
        ",
            )
            .await?;

        // The count cannot see the row inserted by the same statement, hence the + 1
        match self
            .client
            .query_one(&stmt, &[&user_id, &book_id, &POPULARITY_WINDOW_DAYS])
            .await
        {
            Ok(row) => {
                let reserved_at: DateTime<Utc> = row.try_get(1)?;
                Ok(Reservation {
                    id: row.try_get(0)?,
                    user_id,
                    book_id,
                    reserved_at,
                })
            }
            Err(err) if is_violation(&err, &SqlState::UNIQUE_VIOLATION) => {
                Err(LibraryRepositoryError::BookAlreadyReserved { user_id, book_id })
            }
            Err(err) if is_violation(&err, &SqlState::FOREIGN_KEY_VIOLATION) => {
                Err(LibraryRepositoryError::BookNotFound(book_id))
            }
            Err(other_err) => Err(other_err.into()),
        }
    }

    async fn recompute_popularity(&self, book_id: BookId) -> Result<i32, LibraryRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "
        UPDATE books
        SET popularity_score = (
            SELECT COUNT(*)::INTEGER
            FROM reservations
            WHERE id_book = $1
            AND date_reservation >= NOW() - make_interval(days => $2)
        )
        WHERE id = $1
        RETURNING popularity_score
        ",
            )
            .await?;

        let rows = self
            .client
            .query(&stmt, &[&book_id, &POPULARITY_WINDOW_DAYS])
            .await?;

        Ok(rows
            .first()
            .ok_or(LibraryRepositoryError::BookNotFound(book_id))?
            .try_get(0)?)
    }

    async fn list_reservations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Reservation>, LibraryRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT id, id_book, date_reservation FROM reservations WHERE id_user = $1 ORDER BY id",
            )
            .await?;

        let rows = self.client.query(&stmt, &[&user_id]).await?;

        rows.iter()
            .map(|row| {
                Ok(Reservation {
                    id: row.try_get(0)?,
                    user_id,
                    book_id: row.try_get(1)?,
                    reserved_at: row.try_get(2)?,
                })
            })
            .collect()
    }
}
