use crate::api::{Book, RecommendationKind, Recommendations, RecommendedBook, UserId};
use crate::library_repository::{LibraryRepository, LibraryRepositoryError};

fn tag(books: Vec<Book>, kind: RecommendationKind) -> Vec<RecommendedBook> {
    books
        .into_iter()
        .map(|book| RecommendedBook::new(book, kind))
        .collect()
}

pub async fn recommend_by_genre(
    repository: &dyn LibraryRepository,
    user_id: UserId,
) -> Result<Vec<RecommendedBook>, LibraryRepositoryError> {
    Ok(tag(
        repository.recommend_by_genre(user_id).await?,
        RecommendationKind::Genre,
    ))
}

pub async fn recommend_popular(
    repository: &dyn LibraryRepository,
    user_id: UserId,
) -> Result<Vec<RecommendedBook>, LibraryRepositoryError> {
    Ok(tag(
        repository.recommend_popular(user_id).await?,
        RecommendationKind::Popular,
    ))
}

#[tracing::instrument(skip(repository))]
pub async fn recommendations_for_user(
    repository: &dyn LibraryRepository,
    user_id: UserId,
) -> Result<Recommendations, LibraryRepositoryError> {
    let recommendations = Recommendations {
        by_genre: recommend_by_genre(repository, user_id).await?,
        popular: recommend_popular(repository, user_id).await?,
    };

    tracing::debug!(
        "Recommendations for user {}: {} by genre, {} popular",
        user_id,
        recommendations.by_genre.len(),
        recommendations.popular.len()
    );

    Ok(recommendations)
}
