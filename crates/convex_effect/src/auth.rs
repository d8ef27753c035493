use std::{
    collections::BTreeMap,
    sync::Arc,
};

use serde::{
    Deserialize,
    Serialize,
};

use crate::host::AuthHost;

/// Claims about the authenticated caller, taken from their identity token.
/// `token_identifier` is unique per user and issuer and is the value to key
/// user records on.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub token_identifier: String,
    pub issuer: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Any claims not listed above, as they appeared in the token.
    #[serde(flatten)]
    pub custom_claims: BTreeMap<String, serde_json::Value>,
}

impl UserIdentity {
    pub fn new(issuer: impl Into<String>, subject: impl Into<String>) -> Self {
        let issuer = issuer.into();
        let subject = subject.into();
        Self {
            token_identifier: format!("{issuer}|{subject}"),
            issuer,
            subject,
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct Auth {
    host: Arc<dyn AuthHost>,
}

impl Auth {
    pub fn new(host: Arc<dyn AuthHost>) -> Self {
        Self { host }
    }

    /// The caller's identity, or `None` for unauthenticated calls.
    pub async fn get_user_identity(&self) -> anyhow::Result<Option<UserIdentity>> {
        self.host.get_user_identity().await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::UserIdentity;

    #[test]
    fn test_identity_json() -> anyhow::Result<()> {
        let mut identity = UserIdentity::new("https://auth.example.com", "user_1");
        identity.email = Some("ada@example.com".to_string());
        identity
            .custom_claims
            .insert("org".to_string(), json!("acme"));
        let json = serde_json::to_value(&identity)?;
        assert_eq!(
            json,
            json!({
                "tokenIdentifier": "https://auth.example.com|user_1",
                "issuer": "https://auth.example.com",
                "subject": "user_1",
                "email": "ada@example.com",
                "org": "acme",
            })
        );
        assert_eq!(serde_json::from_value::<UserIdentity>(json)?, identity);
        Ok(())
    }
}
