use actix_web::dev::Payload;
use actix_web::http::header::HeaderMap;
use actix_web::{FromRequest, HttpRequest};
use std::future::{ready, Ready};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const VERIFIED_HEADER: &str = "X-User-Verified";
pub const ADMIN_HEADER: &str = "X-User-Admin";

/// Identity attached to the request by the authenticating proxy in front of
/// the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: i64,
    pub verified: bool,
    pub admin: bool,
}

/// Request extractor; anonymous when no usable user id header is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaybeCaller(pub Option<Caller>);

impl MaybeCaller {
    pub fn user_id(&self) -> Option<i64> {
        self.0.map(|caller| caller.user_id)
    }

    pub fn require_admin(&self) -> Result<Caller, ApiError> {
        match self.0 {
            None => Err(ApiError::Unauthorized),
            Some(caller) if caller.admin => Ok(caller),
            Some(_) => Err(ApiError::Forbidden("administrator access required")),
        }
    }

    /// Verified users and administrators.
    pub fn require_verified(&self) -> Result<Caller, ApiError> {
        match self.0 {
            None => Err(ApiError::Unauthorized),
            Some(caller) if caller.verified || caller.admin => Ok(caller),
            Some(_) => Err(ApiError::Forbidden("identity verification required")),
        }
    }

    fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
        let flag = |name: &str| {
            text(name).map_or(false, |value| {
                matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
            })
        };

        let caller = text(USER_ID_HEADER)
            .and_then(|value| value.trim().parse::<i64>().ok())
            .map(|user_id| Caller {
                user_id,
                verified: flag(VERIFIED_HEADER),
                admin: flag(ADMIN_HEADER),
            });
        MaybeCaller(caller)
    }
}

impl FromRequest for MaybeCaller {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(MaybeCaller::from_headers(req.headers())))
    }
}
