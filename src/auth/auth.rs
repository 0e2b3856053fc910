use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::model::actor::{Actor, Role};
use actix_web::{
    FromRequest, HttpMessage, HttpRequest, dev::Payload, error::ErrorUnauthorized, web::Data,
};
use futures::future::{Ready, ready};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub role: Role,
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // set by auth_middleware on protected scopes
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        let token = match req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
        {
            Some(t) => t,
            None => return ready(Err(ErrorUnauthorized("Missing token"))),
        };

        let config = match req.app_data::<Data<Config>>() {
            Some(c) => c,
            None => {
                return ready(Err(
                    actix_web::error::ErrorInternalServerError("Config missing"),
                ));
            }
        };

        let claims = match verify_token(token, &config.jwt_secret) {
            Ok(c) => c,
            Err(_) => return ready(Err(ErrorUnauthorized("Invalid token"))),
        };

        let role = match Role::from_id(claims.role) {
            Some(r) => r,
            None => return ready(Err(ErrorUnauthorized("Invalid role"))),
        };

        ready(Ok(AuthUser {
            user_id: claims.user_id,
            username: claims.sub,
            role,
        }))
    }
}

impl AuthUser {
    /// Service-role tokens act as the system.
    pub fn actor(&self) -> Actor {
        match self.role {
            Role::System => Actor::System,
            _ => Actor::Human(self.user_id),
        }
    }

    pub fn require_hr_or_admin(&self) -> actix_web::Result<()> {
        if self.role.can_approve() {
            Ok(())
        } else {
            Err(actix_web::error::ErrorForbidden("HR/Admin only"))
        }
    }

    /// Employees may only act on their own records.
    pub fn require_self_or_hr(&self, user_id: u64) -> actix_web::Result<()> {
        if self.user_id == user_id || self.role.can_approve() {
            Ok(())
        } else {
            Err(actix_web::error::ErrorForbidden("Not your record"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> AuthUser {
        AuthUser {
            user_id: 7,
            username: "user7".into(),
            role,
        }
    }

    #[test]
    fn system_role_maps_to_system_actor() {
        assert_eq!(user(Role::System).actor(), Actor::System);
        assert_eq!(user(Role::Hr).actor(), Actor::Human(7));
    }

    #[test]
    fn employees_only_touch_their_own_records() {
        let employee = user(Role::Employee);
        assert!(employee.require_self_or_hr(7).is_ok());
        assert!(employee.require_self_or_hr(8).is_err());
        assert!(employee.require_hr_or_admin().is_err());
        assert!(user(Role::Admin).require_self_or_hr(8).is_ok());
    }
}
