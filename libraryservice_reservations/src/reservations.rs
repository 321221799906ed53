use crate::api::{BookId, ReservationOutcome, UserId};
use crate::library_repository::{LibraryRepository, LibraryRepositoryError};

/// Shown instead of storage errors, the full error only goes to the logs
const STORAGE_FAILURE_DETAIL: &str = "the library is temporarily unavailable";

/// Reserves the book for the user, the repository refreshes its popularity score
/// in the same step. Never fails, every failure is folded into the returned outcome.
#[tracing::instrument(skip(repository))]
pub async fn create_reservation(
    repository: &dyn LibraryRepository,
    user_id: UserId,
    book_id: BookId,
) -> ReservationOutcome {
    match repository.reserve_book(user_id, book_id).await {
        Ok(reservation) => {
            tracing::info!("Reservation {} of book {} created", reservation.id, book_id);
            ReservationOutcome::Reserved
        }
        Err(LibraryRepositoryError::BookAlreadyReserved { .. }) => {
            ReservationOutcome::AlreadyReserved
        }
        Err(err @ LibraryRepositoryError::BookNotFound(_)) => ReservationOutcome::Failed {
            detail: err.to_string(),
        },
        Err(err) => {
            tracing::error!("Reserve book {} failed {}", book_id, err);
            ReservationOutcome::Failed {
                detail: STORAGE_FAILURE_DETAIL.to_string(),
            }
        }
    }
}
