use secrecy::SecretString;

/// Join a base account URI and a username without duplicating the path
/// separator.
pub fn join_username(uri: &str, username: &str) -> String {
    if uri.ends_with('/') {
        format!("{uri}{username}")
    } else {
        format!("{uri}/{username}")
    }
}

/// A ledger-side accounting principal: who we authenticate as and under
/// which ledger prefix we are addressable.
#[derive(Clone, Debug)]
pub struct Account {
    /// Absolute base account URI, e.g. `http://red.example/accounts`.
    pub uri: String,
    pub username: String,
    pub password: SecretString,
    /// Ledger address prefix, e.g. `example.red.`.
    pub prefix: String,
}

impl Account {
    pub fn new(
        uri: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            username: username.into(),
            password: SecretString::from(password.into()),
            prefix: prefix.into(),
        }
    }

    /// This account's own resource URI.
    pub fn resource_uri(&self) -> String {
        join_username(&self.uri, &self.username)
    }

    /// Globally addressable ledger id for this account: `prefix + username`.
    pub fn address(&self) -> String {
        format!("{}{}", self.prefix, self.username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_without_trailing_slash() {
        assert_eq!(
            join_username("http://red.example/accounts", "mike"),
            "http://red.example/accounts/mike"
        );
    }

    #[test]
    fn join_with_trailing_slash() {
        assert_eq!(
            join_username("http://red.example/accounts/", "mike"),
            "http://red.example/accounts/mike"
        );
    }

    #[test]
    fn account_addressing() {
        let account = Account::new(
            "http://red.example/accounts",
            "mike",
            "secret",
            "example.red.",
        );
        assert_eq!(account.address(), "example.red.mike");
        assert_eq!(account.resource_uri(), "http://red.example/accounts/mike");
    }
}
