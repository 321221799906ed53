use std::sync::Arc;

use actix_web::http::header::{ContentType, LOCATION};
use actix_web::web::Data;
use actix_web::{Error, HttpRequest, HttpResponse};
use paperclip::actix::{
    api_v2_operation,
    web::{self, Json},
};

use crate::api::{
    BookId, NewBook, PageQuery, Recommendations, ReservationForm, ReservationOutcome,
    ReservationRecord, UserId,
};
use crate::identity::resolve_user_id;
use crate::library_repository::{LibraryRepository, LibraryRepositoryError};
use crate::page::{render_error_page, render_recommendations_page};
use crate::recommendations::recommendations_for_user;
use crate::reservations::create_reservation;

async fn recommendations_page(
    repository: &dyn LibraryRepository,
    user_id: UserId,
    message: Option<&str>,
) -> HttpResponse {
    match recommendations_for_user(repository, user_id).await {
        Ok(recommendations) => HttpResponse::Ok()
            .content_type(ContentType::html())
            .body(render_recommendations_page(&recommendations, message)),
        Err(err) => {
            tracing::error!("Get recommendations for user {} failed {}", user_id, err);
            HttpResponse::InternalServerError()
                .content_type(ContentType::html())
                .body(render_error_page())
        }
    }
}

/// Redirect-after-post back to the page, carrying the outcome as the banner message
fn redirect_with_message(message: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header((LOCATION, format!("/?message={}", urlencoding::encode(message))))
        .finish()
}

#[api_v2_operation]
pub async fn health() -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().finish())
}

#[api_v2_operation]
pub async fn index(
    req: HttpRequest,
    library_repository: Data<Arc<dyn LibraryRepository>>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, Error> {
    let user_id = resolve_user_id(&req)?;
    Ok(recommendations_page(
        library_repository.get_ref().as_ref(),
        user_id,
        query.message.as_deref(),
    )
    .await)
}

#[api_v2_operation]
pub async fn reserve(
    req: HttpRequest,
    library_repository: Data<Arc<dyn LibraryRepository>>,
    form: web::Form<ReservationForm>,
) -> Result<HttpResponse, Error> {
    let user_id = resolve_user_id(&req)?;
    let repository = library_repository.get_ref().as_ref();

    let raw_book_id = match form.into_inner().book_id {
        Some(raw_book_id) => raw_book_id,
        // Nothing to reserve, behave like a plain page load
        None => return Ok(recommendations_page(repository, user_id, None).await),
    };

    let outcome = match raw_book_id.trim().parse::<BookId>() {
        Ok(book_id) => create_reservation(repository, user_id, book_id).await,
        Err(_) => ReservationOutcome::Failed {
            detail: format!("Invalid book id {}", raw_book_id),
        },
    };

    Ok(redirect_with_message(&outcome.message()))
}

#[api_v2_operation]
pub async fn add_book(
    library_repository: Data<Arc<dyn LibraryRepository>>,
    book: web::Json<NewBook>,
) -> Result<HttpResponse, Error> {
    Ok(match library_repository.add_book(book.into_inner()).await {
        Ok(book_id) => HttpResponse::Ok()
            .append_header((LOCATION, format!("/api/book/{}", book_id)))
            .finish(),
        Err(err) => {
            tracing::error!("Add book failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn get_book(
    library_repository: Data<Arc<dyn LibraryRepository>>,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    Ok(
        match library_repository.get_book(book_id.into_inner()).await {
            Ok(book) => HttpResponse::Ok().json(book),
            Err(LibraryRepositoryError::BookNotFound(_)) => HttpResponse::NotFound().finish(),
            Err(err) => {
                tracing::error!("Get book failed {}", err);
                HttpResponse::InternalServerError().finish()
            }
        },
    )
}

#[api_v2_operation]
pub async fn get_recommendations_for_user(
    library_repository: Data<Arc<dyn LibraryRepository>>,
    user_id: web::Path<UserId>,
) -> Result<Json<Recommendations>, Error> {
    recommendations_for_user(library_repository.get_ref().as_ref(), user_id.into_inner())
        .await
        .map(Json)
        .map_err(|err| {
            tracing::error!("Get recommendations failed {}", err);
            actix_web::error::ErrorInternalServerError("Failed to get recommendations")
        })
}

#[api_v2_operation]
pub async fn get_all_reservations(
    library_repository: Data<Arc<dyn LibraryRepository>>,
    user_id: web::Path<UserId>,
) -> Result<Json<Vec<ReservationRecord>>, Error> {
    library_repository
        .list_reservations(user_id.into_inner())
        .await
        .map(|reservations| Json(reservations.into_iter().map(Into::into).collect()))
        .map_err(|err| {
            tracing::error!("List reservations failed {}", err);
            actix_web::error::ErrorInternalServerError("Failed to list reservations")
        })
}

#[cfg(test)]
mod handler_tests {
    use actix_web::http::StatusCode;
    use actix_web::test;
    use paperclip::actix::OpenApiExt;

    use crate::api::Book;
    use crate::app_config::config_app;
    use crate::identity::{IdentityConfig, USER_ID_HEADER};
    use crate::library_repository::{InMemoryLibraryRepository, Reservation};

    use super::*;

    async fn seeded_repository() -> (Arc<dyn LibraryRepository>, Vec<BookId>) {
        let repository: Arc<dyn LibraryRepository> = Arc::new(InMemoryLibraryRepository::default());
        let mut book_ids = vec![];
        for (title, genre) in [
            ("Good Omens", "fantasy"),
            ("Small Gods", "fantasy"),
            ("Gone Girl", "thriller"),
        ] {
            book_ids.push(
                repository
                    .add_book(NewBook {
                        title: title.to_string(),
                        genre: genre.to_string(),
                    })
                    .await
                    .unwrap(),
            );
        }
        (repository, book_ids)
    }

    macro_rules! init_app {
        ($repository:expr) => {
            test::init_service(
                actix_web::App::new()
                    .wrap_api()
                    .app_data(Data::new($repository.clone()))
                    .app_data(Data::new(IdentityConfig {
                        default_user_id: Some(1),
                    }))
                    .configure(config_app)
                    .build(),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_get_page_lists_recommendations() {
        let (repository, _) = seeded_repository().await;
        let app = init_app!(repository);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let page = test::read_body(resp).await;
        let page = std::str::from_utf8(&page).unwrap();
        assert!(page.contains("Good Omens"));
        assert!(page.contains("Gone Girl"));
    }

    #[actix_web::test]
    /// 1. Posts reservation - redirected with success message
    /// 2. Posts it again - redirected with already reserved message
    /// 3. Follows the redirect - banner rendered and book gone from the page
    async fn test_reserve_redirects_with_outcome_message() {
        let (repository, book_ids) = seeded_repository().await;
        let app = init_app!(repository);

        let reserve_request = || {
            test::TestRequest::post()
                .uri("/")
                .set_form([("book_id", book_ids[0].to_string())])
                .to_request()
        };

        let resp = test::call_service(&app, reserve_request()).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let location = resp.headers().get(LOCATION).unwrap().to_str().unwrap();
        assert_eq!(location, "/?message=Book%20reserved%20successfully");
        assert_eq!(repository.get_book(book_ids[0]).await.unwrap().popularity_score, 1);

        let resp = test::call_service(&app, reserve_request()).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let location = resp
            .headers()
            .get(LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(
            location,
            format!(
                "/?message={}",
                urlencoding::encode(&ReservationOutcome::AlreadyReserved.message())
            )
        );
        assert_eq!(repository.list_reservations(1).await.unwrap().len(), 1);

        let resp =
            test::call_service(&app, test::TestRequest::get().uri(&location).to_request()).await;
        let page = test::read_body(resp).await;
        let page = std::str::from_utf8(&page).unwrap();
        assert!(page.contains("This book is already reserved"));
        assert!(!page.contains("Good Omens"));
    }

    #[actix_web::test]
    async fn test_reserve_with_invalid_or_unknown_book_id() {
        let (repository, _) = seeded_repository().await;
        let app = init_app!(repository);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/")
                .set_form([("book_id", "abc")])
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            resp.headers().get(LOCATION).unwrap().to_str().unwrap(),
            "/?message=Reservation%20failed%3A%20Invalid%20book%20id%20abc"
        );

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/")
                .set_form([("book_id", "4242")])
                .to_request(),
        )
        .await;
        assert_eq!(
            resp.headers().get(LOCATION).unwrap().to_str().unwrap(),
            "/?message=Reservation%20failed%3A%20Book%204242%20not%20found"
        );
        assert!(repository.list_reservations(1).await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_post_without_book_id_renders_page() {
        let (repository, _) = seeded_repository().await;
        let app = init_app!(repository);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/")
                .set_form([("other", "1")])
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_message_banner_is_escaped() {
        let (repository, _) = seeded_repository().await;
        let app = init_app!(repository);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/?message=%3Cscript%3Ealert(1)%3C%2Fscript%3E")
                .to_request(),
        )
        .await;
        let page = test::read_body(resp).await;
        let page = std::str::from_utf8(&page).unwrap();
        assert!(page.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(!page.contains("<script>"));
    }

    #[actix_web::test]
    async fn test_identity_header_selects_user() {
        let (repository, book_ids) = seeded_repository().await;
        let app = init_app!(repository);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/")
                .insert_header((USER_ID_HEADER, "5"))
                .set_form([("book_id", book_ids[2].to_string())])
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(repository.list_reservations(5).await.unwrap().len(), 1);
        assert!(repository.list_reservations(1).await.unwrap().is_empty());

        let recommendations: Recommendations = test::call_and_read_body_json(
            &app,
            test::TestRequest::get()
                .uri("/api/user/5/recommendations")
                .to_request(),
        )
        .await;
        assert!(recommendations.by_genre.is_empty());
        assert!(recommendations
            .popular
            .iter()
            .all(|r| r.book.id != book_ids[2]));

        let reservations: Vec<ReservationRecord> = test::call_and_read_body_json(
            &app,
            test::TestRequest::get()
                .uri("/api/user/5/reservations")
                .to_request(),
        )
        .await;
        assert_eq!(reservations.len(), 1);
        assert_eq!(reservations[0].book_id, book_ids[2]);
    }

    #[actix_web::test]
    async fn test_add_and_get_book() {
        let repository: Arc<dyn LibraryRepository> = Arc::new(InMemoryLibraryRepository::default());
        let app = init_app!(repository);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/book")
                .set_json(NewBook {
                    title: "Neuromancer".to_string(),
                    genre: "scifi".to_string(),
                })
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let location = resp
            .headers()
            .get(LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let book: Book =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri(&location).to_request())
                .await;
        assert_eq!(book.title, "Neuromancer");
        assert_eq!(book.popularity_score, 0);

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/book/999").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let raw: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/user/1/recommendations").to_request(),
        )
        .await;
        assert_eq!(raw["popular"][0]["kind"], "popular");
    }

    const STORAGE_ERROR: &str = "connection refused by db.internal:5432";

    /// Library whose storage is down
    struct UnavailableRepository;

    #[async_trait::async_trait]
    impl LibraryRepository for UnavailableRepository {
        async fn add_book(&self, _book: NewBook) -> Result<BookId, LibraryRepositoryError> {
            Err(LibraryRepositoryError::Other(STORAGE_ERROR.to_string()))
        }

        async fn get_book(&self, _book_id: BookId) -> Result<Book, LibraryRepositoryError> {
            Err(LibraryRepositoryError::Other(STORAGE_ERROR.to_string()))
        }

        async fn recommend_by_genre(
            &self,
            _user_id: UserId,
        ) -> Result<Vec<Book>, LibraryRepositoryError> {
            Err(LibraryRepositoryError::Other(STORAGE_ERROR.to_string()))
        }

        async fn recommend_popular(
            &self,
            _user_id: UserId,
        ) -> Result<Vec<Book>, LibraryRepositoryError> {
            Err(LibraryRepositoryError::Other(STORAGE_ERROR.to_string()))
        }

        async fn reserve_book(
            &self,
            _user_id: UserId,
            _book_id: BookId,
        ) -> Result<Reservation, LibraryRepositoryError> {
            Err(LibraryRepositoryError::Other(STORAGE_ERROR.to_string()))
        }

        async fn recompute_popularity(
            &self,
            _book_id: BookId,
        ) -> Result<i32, LibraryRepositoryError> {
            Err(LibraryRepositoryError::Other(STORAGE_ERROR.to_string()))
        }

        async fn list_reservations(
            &self,
            _user_id: UserId,
        ) -> Result<Vec<Reservation>, LibraryRepositoryError> {
            Err(LibraryRepositoryError::Other(STORAGE_ERROR.to_string()))
        }
    }

    #[actix_web::test]
    /// Page load with storage down renders the generic error page without the cause
    async fn test_get_page_when_library_unavailable() {
        let repository: Arc<dyn LibraryRepository> = Arc::new(UnavailableRepository);
        let app = init_app!(repository);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let content_type = resp
            .headers()
            .get(actix_web::http::header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/html"));

        let page = test::read_body(resp).await;
        let page = std::str::from_utf8(&page).unwrap();
        assert!(page.contains("temporarily unavailable"));
        assert!(!page.contains("db.internal"));
        assert!(!page.contains(STORAGE_ERROR));
    }

    #[actix_web::test]
    /// Reservation with storage down still redirects, with a generic failure message
    async fn test_reserve_when_library_unavailable() {
        let repository: Arc<dyn LibraryRepository> = Arc::new(UnavailableRepository);
        let app = init_app!(repository);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/")
                .set_form([("book_id", "1")])
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let location = resp.headers().get(LOCATION).unwrap().to_str().unwrap();
        assert_eq!(
            location,
            "/?message=Reservation%20failed%3A%20the%20library%20is%20temporarily%20unavailable"
        );
    }

    #[actix_web::test]
    async fn test_other_methods_are_not_allowed() {
        let (repository, _) = seeded_repository().await;
        let app = init_app!(repository);

        let resp =
            test::call_service(&app, test::TestRequest::delete().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
