use serde::Deserialize;

/// Input shape for creating or replacing a user. Carries the plaintext secret,
/// which the store hashes before anything is written.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct NewUser {
    /// Requested id; storage assigns one when `None`. Ignored on update.
    #[serde(default)]
    pub id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("id", &self.id)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_password() {
        let user = NewUser {
            id: None,
            first_name: "Jose".into(),
            last_name: "Moyano".into(),
            username: "josemoyano04".into(),
            email: "josemoyano059@gmail.com".into(),
            password: "contraseña".into(),
        };
        let out = format!("{user:?}");
        assert!(out.contains("josemoyano04"));
        assert!(!out.contains("contraseña"));
    }

    #[test]
    fn deserializes_without_id() {
        let user: NewUser = serde_json::from_str(
            r#"{"first_name":"Jose","last_name":"Moyano","username":"jm",
                "email":"jm@example.com","password":"12345678"}"#,
        )
        .unwrap();
        assert_eq!(user.id, None);
        assert_eq!(user.username, "jm");
    }
}
