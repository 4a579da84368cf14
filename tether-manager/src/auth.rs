//! Credential checks handed to channel connectors.

use std::collections::HashMap;
use std::sync::Arc;
use tether::{AuthFunc, Credentials};
use tracing::debug;

/// Builds an `auth_func` accepting exactly the users in `[api_users]`.
///
/// Returns `None` when no users are configured, which leaves channels open.
pub fn api_users_auth(users: &HashMap<String, String>) -> Option<AuthFunc> {
    if users.is_empty() {
        return None;
    }
    let users = users.clone();
    let auth: AuthFunc = Arc::new(move |creds: &Credentials| {
        let accepted = users
            .get(&creds.username)
            .is_some_and(|password| *password == creds.password);
        if !accepted {
            debug!(username = %creds.username, "Rejected credentials");
        }
        accepted
    });
    Some(auth)
}
