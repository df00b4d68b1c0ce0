use std::collections::HashMap;

/// Maps Trac identities to destination usernames.
///
/// Resolution never fails: identities missing from the table resolve to the
/// default user, since historical authors often no longer exist.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    usernames: HashMap<String, String>,
    default_user: String,
}

impl IdentityResolver {
    pub fn new(usernames: HashMap<String, String>, default_user: impl Into<String>) -> Self {
        Self {
            usernames,
            default_user: default_user.into(),
        }
    }

    pub fn resolve<'a>(&'a self, identity: &str) -> &'a str {
        self.mapped(identity).unwrap_or(&self.default_user)
    }

    /// Explicit table entry for `identity`, without the default fallback.
    pub fn mapped<'a>(&'a self, identity: &str) -> Option<&'a str> {
        self.usernames.get(identity).map(String::as_str)
    }

    pub fn default_user(&self) -> &str {
        &self.default_user
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> IdentityResolver {
        let mut map = HashMap::new();
        map.insert("alice".to_string(), "alice.smith".to_string());
        map.insert("bob".to_string(), "bjones".to_string());
        IdentityResolver::new(map, "migration-bot")
    }

    #[test]
    fn mapped_identity_resolves_to_table_entry() {
        assert_eq!(resolver().resolve("alice"), "alice.smith");
        assert_eq!(resolver().resolve("bob"), "bjones");
    }

    #[test]
    fn unknown_identity_falls_back_to_default() {
        let r = resolver();
        for identity in ["carol", "", "Alice", "anonymous"] {
            assert_eq!(r.resolve(identity), "migration-bot");
            assert_eq!(r.mapped(identity), None);
        }
    }
}
