use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use percent_encoding::percent_decode_str;
use url::Url;

use crate::api::TokenSource;
use crate::storage::Store;

pub const TOKEN_ENV: &str = "THREADSCOUT_TOKEN";

/// Session token holder. The OAuth dance itself happens server-side in a
/// browser; this end only ever sees the resulting bearer token, either
/// pasted from the redirect URL, taken from the environment, or loaded
/// from a previous run.
pub struct TokenStore {
    store: Store,
    cached: RwLock<Option<String>>,
}

impl TokenStore {
    pub fn new(store: Store) -> Self {
        TokenStore {
            store,
            cached: RwLock::new(None),
        }
    }

    /// Establish the session token for this run. Precedence: environment
    /// variable, then a token persisted by a previous session.
    pub fn hydrate(&self) -> Result<bool> {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            let token = token.trim().to_string();
            if !token.is_empty() {
                self.set(&token, "")?;
                return Ok(true);
            }
        }
        if let Some(session) = self.store.load_session().context("auth: load session")? {
            *self.cached.write() = Some(session.token);
            return Ok(true);
        }
        Ok(false)
    }

    pub fn set(&self, token: &str, username: &str) -> Result<()> {
        if token.is_empty() {
            bail!("auth: empty token");
        }
        self.store
            .save_session(token, username)
            .context("auth: persist session")?;
        *self.cached.write() = Some(token.to_string());
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear_session().context("auth: clear session")?;
        *self.cached.write() = None;
        Ok(())
    }

    pub fn has_token(&self) -> bool {
        self.cached.read().is_some()
    }
}

impl TokenSource for TokenStore {
    fn bearer(&self) -> Option<String> {
        self.cached.read().clone()
    }
}

pub type SharedTokens = Arc<TokenStore>;

/// Pull the bearer token out of a login redirect URL. The server sends
/// the browser back with the token in the fragment so it never hits any
/// request log: `https://host/app#token=...`.
pub fn parse_fragment_token(redirect_url: &str) -> Result<String> {
    let url = Url::parse(redirect_url).context("auth: parse redirect url")?;
    let fragment = url
        .fragment()
        .filter(|f| !f.is_empty())
        .context("auth: redirect url has no fragment")?;

    for pair in fragment.split('&') {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or_default();
        if key != "token" {
            continue;
        }
        let raw = parts.next().unwrap_or_default();
        let token = percent_decode_str(raw)
            .decode_utf8()
            .context("auth: decode token")?
            .trim()
            .to_string();
        if token.is_empty() {
            bail!("auth: token parameter is empty");
        }
        return Ok(token);
    }
    bail!("auth: no token parameter in fragment")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Options;
    use tempfile::tempdir;

    fn token_store(dir: &tempfile::TempDir) -> TokenStore {
        let store = Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();
        TokenStore::new(store)
    }

    #[test]
    fn fragment_token_is_extracted_and_decoded() {
        let token =
            parse_fragment_token("https://forum.example/app#token=abc%2Fdef&user=jo").unwrap();
        assert_eq!(token, "abc/def");
    }

    #[test]
    fn fragment_without_token_is_an_error() {
        assert!(parse_fragment_token("https://forum.example/app#user=jo").is_err());
        assert!(parse_fragment_token("https://forum.example/app").is_err());
        assert!(parse_fragment_token("https://forum.example/app#token=").is_err());
    }

    #[test]
    fn set_and_clear_round_trip_through_storage() {
        let dir = tempdir().unwrap();
        let tokens = token_store(&dir);

        assert!(tokens.bearer().is_none());
        tokens.set("tok", "alice").unwrap();
        assert_eq!(tokens.bearer().as_deref(), Some("tok"));

        tokens.clear().unwrap();
        assert!(tokens.bearer().is_none());
        assert!(!tokens.has_token());
    }

    #[test]
    fn hydrate_restores_persisted_session() {
        let dir = tempdir().unwrap();
        {
            let tokens = token_store(&dir);
            tokens.set("persisted", "alice").unwrap();
        }
        let tokens = token_store(&dir);
        assert!(tokens.hydrate().unwrap());
        assert_eq!(tokens.bearer().as_deref(), Some("persisted"));
    }
}
