use paperclip::actix::web;

use crate::handlers;

pub fn config_app(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/")
            .route(web::get().to(handlers::index))
            .route(web::post().to(handlers::reserve)),
    )
    .service(web::resource("/health").route(web::get().to(handlers::health)))
    .service(
        web::scope("/api")
            .service(web::resource("/book").route(web::post().to(handlers::add_book)))
            .service(web::resource("/book/{book_id}").route(web::get().to(handlers::get_book)))
            .service(
                web::scope("/user/{user_id}")
                    .service(
                        web::resource("/recommendations")
                            .route(web::get().to(handlers::get_recommendations_for_user)),
                    )
                    .service(
                        web::resource("/reservations")
                            .route(web::get().to(handlers::get_all_reservations)),
                    ),
            ),
    );
}
