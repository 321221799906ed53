use actix_web::error::{ErrorBadRequest, ErrorUnauthorized};
use actix_web::web::Data;
use actix_web::HttpRequest;

pub use crate::api::USER_ID_HEADER;
use crate::api::UserId;
use crate::settings::ApplicationSettings;

#[derive(Debug, Clone, Default)]
pub struct IdentityConfig {
    /// Stand-in identity for requests without the header, None rejects them
    pub default_user_id: Option<UserId>,
}

impl IdentityConfig {
    pub fn from_settings(settings: &ApplicationSettings) -> Self {
        Self {
            default_user_id: if settings.require_identity {
                None
            } else {
                settings.default_user_id
            },
        }
    }
}

/// Resolves the user a request acts for, the header wins over the configured default
pub fn resolve_user_id(req: &HttpRequest) -> Result<UserId, actix_web::Error> {
    if let Some(header) = req.headers().get(USER_ID_HEADER) {
        return header
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .ok_or_else(|| ErrorBadRequest("Invalid user id header"));
    }

    req.app_data::<Data<IdentityConfig>>()
        .and_then(|config| config.default_user_id)
        .ok_or_else(|| ErrorUnauthorized("Missing user identity"))
}
