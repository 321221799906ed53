use paperclip::actix::Apiv2Schema;
use serde::{Deserialize, Serialize};

pub type UserId = i32;
pub type BookId = i32;
pub type ReservationId = i32;

/// Set by the identity provider in front of the service
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Book as stored in the library, popularity_score is maintained by the service
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub genre: String,
    pub popularity_score: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Details required to add a book, new books start with popularity score 0
pub struct NewBook {
    pub title: String,
    pub genre: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Apiv2Schema)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationKind {
    Genre,
    Popular,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct RecommendedBook {
    pub book: Book,
    pub kind: RecommendationKind,
}

impl RecommendedBook {
    pub fn new(book: Book, kind: RecommendationKind) -> Self {
        Self { book, kind }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Both recommendation lists for a user, never contains books already reserved by the user
pub struct Recommendations {
    /// Up to 10 most popular books from the 3 genres the user reserved most often
    pub by_genre: Vec<RecommendedBook>,
    /// Up to 5 most popular books overall
    pub popular: Vec<RecommendedBook>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct ReservationRecord {
    pub reservation_id: ReservationId,
    pub book_id: BookId,
    /// Unix timestamp in seconds
    pub reserved_at: i64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Apiv2Schema)]
/// Form posted by the reserve button of the recommendations page
pub struct ReservationForm {
    pub book_id: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Apiv2Schema)]
pub struct PageQuery {
    pub message: Option<String>,
}

/// Result of a reservation attempt, rendered to the user as a banner message
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ReservationOutcome {
    Reserved,
    AlreadyReserved,
    Failed { detail: String },
}

impl ReservationOutcome {
    pub fn message(&self) -> String {
        match self {
            ReservationOutcome::Reserved => "Book reserved successfully".to_string(),
            ReservationOutcome::AlreadyReserved => "This book is already reserved".to_string(),
            ReservationOutcome::Failed { detail } => format!("Reservation failed: {}", detail),
        }
    }
}
