use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use ulid::Ulid;

use crate::model::{Actor, Role};
use crate::observability::AUTH_FAILURES_TOTAL;

/// Parse a startup `user` of the form `<role>:<ulid>`.
pub fn parse_login(user: &str) -> Option<Actor> {
    let (role, id) = user.split_once(':')?;
    let role = Role::parse(&role.to_ascii_lowercase())?;
    let user_id = Ulid::from_string(id).ok()?;
    Some(Actor::new(user_id, role))
}

/// Shared-secret cleartext auth. The identity itself was established
/// upstream; here we only refuse logins that don't carry one.
#[derive(Debug)]
pub struct ConciergeAuthSource {
    password: String,
}

impl ConciergeAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ConciergeAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        if parse_login(user).is_none() {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!(user, "rejecting login without a <role>:<ulid> identity");
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "28000".into(),
                format!("user must be <role>:<ulid>, got {user:?}"),
            ))));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_role() {
        let id = Ulid::new();
        for (prefix, role) in [
            ("guest", Role::Guest),
            ("hotel_staff", Role::HotelStaff),
            ("admin", Role::Admin),
            ("ADMIN", Role::Admin),
        ] {
            assert_eq!(parse_login(&format!("{prefix}:{id}")), Some(Actor::new(id, role)));
        }
    }

    #[test]
    fn rejects_malformed_identities() {
        let id = Ulid::new();
        assert_eq!(parse_login("postgres"), None);
        assert_eq!(parse_login(&format!("manager:{id}")), None);
        assert_eq!(parse_login("guest:not-a-ulid"), None);
        assert_eq!(parse_login(&format!("{id}")), None);
    }
}
