use actix_web::dev::{ServiceRequest, Transform};
use actix_web::{Error, HttpMessage};
use actix_service::{forward_ready, Service};
use futures::future::{ok, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::rc::Rc;

use crate::errors::ApiError;
use crate::models::Claims;

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
}

// Middleware factory
pub struct AuthMiddleware {
    secret: String,
}

impl AuthMiddleware {
    pub fn new(secret: String) -> Self {
        AuthMiddleware { secret }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = actix_web::dev::ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();

    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddlewareService {
            service: Rc::new(service),
            secret: self.secret.clone(),
        })
    }
}

pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
    secret: String,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = actix_web::dev::ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let secret = self.secret.clone();
        let service = self.service.clone();

        Box::pin(async move {
            // A missing or non-Bearer header is a malformed request (400);
            // a token that fails verification is an auth failure (401).
            let header = req
                .headers()
                .get("Authorization")
                .and_then(|value| value.to_str().ok());

            let token = match header.and_then(|value| value.strip_prefix("Bearer ")) {
                Some(token) if !token.is_empty() => token.to_string(),
                _ => {
                    return Err(ApiError::Auth(
                        "Authorization header is missing or invalid".to_string(),
                    )
                    .into())
                }
            };

            match decode_token(&token, &secret) {
                Ok(claims) => {
                    req.extensions_mut().insert(claims.user);
                    service.call(req).await
                }
                Err(err) => {
                    log::debug!("rejected bearer token: {}", err);
                    Err(ApiError::Unauthorized("Invalid or expired token".to_string()).into())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserDto;
    use actix_web::dev::Service as _;
    use actix_web::http::StatusCode;
    use actix_web::{test, web, App, HttpRequest, HttpResponse};
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token_with_exp(exp: i64, secret: &str) -> String {
        let claims = Claims {
            user: UserDto {
                id: "u-1".to_string(),
                username: "rita".to_string(),
                email: "rita@example.com".to_string(),
                role: "User".to_string(),
            },
            exp: exp as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_ref()),
        )
        .unwrap()
    }

    async fn whoami(req: HttpRequest) -> HttpResponse {
        match req.extensions().get::<UserDto>() {
            Some(user) => HttpResponse::Ok().json(user),
            None => HttpResponse::InternalServerError().finish(),
        }
    }

    macro_rules! guarded_app {
        () => {
            test::init_service(
                App::new()
                    .wrap(AuthMiddleware::new(SECRET.to_string()))
                    .route("/me", web::get().to(whoami)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn missing_header_is_a_bad_request() {
        let app = guarded_app!();
        let req = test::TestRequest::get().uri("/me").to_request();

        let err = app.call(req).await.unwrap_err();
        assert_eq!(err.as_response_error().status_code(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn non_bearer_scheme_is_a_bad_request() {
        let app = guarded_app!();
        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header(("Authorization", "Basic dXNlcjpwYXNz"))
            .to_request();

        let err = app.call(req).await.unwrap_err();
        assert_eq!(err.as_response_error().status_code(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn garbage_token_is_unauthorized() {
        let app = guarded_app!();
        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header(("Authorization", "Bearer not.a.jwt"))
            .to_request();

        let err = app.call(req).await.unwrap_err();
        assert_eq!(
            err.as_response_error().status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[actix_web::test]
    async fn expired_token_is_unauthorized() {
        let app = guarded_app!();
        let expired = chrono::Utc::now().timestamp() - 2 * 60 * 60;
        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header(("Authorization", format!("Bearer {}", token_with_exp(expired, SECRET))))
            .to_request();

        let err = app.call(req).await.unwrap_err();
        assert_eq!(
            err.as_response_error().status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[actix_web::test]
    async fn wrong_secret_is_unauthorized() {
        let app = guarded_app!();
        let exp = chrono::Utc::now().timestamp() + 60 * 60;
        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header((
                "Authorization",
                format!("Bearer {}", token_with_exp(exp, "another-secret")),
            ))
            .to_request();

        let err = app.call(req).await.unwrap_err();
        assert_eq!(
            err.as_response_error().status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[actix_web::test]
    async fn valid_token_reaches_the_handler_with_identity() {
        let app = guarded_app!();
        let exp = chrono::Utc::now().timestamp() + 60 * 60;
        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header(("Authorization", format!("Bearer {}", token_with_exp(exp, SECRET))))
            .to_request();

        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);

        let user: UserDto = test::read_body_json(res).await;
        assert_eq!(user.id, "u-1");
        assert_eq!(user.email, "rita@example.com");
    }

    #[::core::prelude::v1::test]
    fn decode_rejects_expired_tokens_directly() {
        let expired = chrono::Utc::now().timestamp() - 2 * 60 * 60;
        let err = decode_token(&token_with_exp(expired, SECRET), SECRET).unwrap_err();
        assert!(matches!(
            err.kind(),
            jsonwebtoken::errors::ErrorKind::ExpiredSignature
        ));
    }
}
