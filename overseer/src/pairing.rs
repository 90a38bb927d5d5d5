//! Pairing tokens: a short-lived, human-readable code a new chat identity
//! exchanges for a role-scoped [`Identity`](crate::domain::Identity).
//!
//! Only the SHA-256 hash of a token is ever persisted; the plaintext exists
//! for the lifetime of the request that generated it.

use sha2::{Digest, Sha256};

use crate::config::PairingConfig;
use crate::domain::{Connector, PairingRequest, Role};
use crate::error::Result;
use crate::store::Store;
use crate::util;

const TOKEN_BYTES: usize = 10;

/// A freshly minted token, returned once to whoever created the pairing
/// request. The store only ever sees [`hash`](PlaintextToken::hash).
#[derive(Debug, Clone)]
pub struct PlaintextToken {
    pub token: String,
    pub hint: String,
}

impl PlaintextToken {
    fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        fastrand::fill(&mut bytes);
        let token = base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &bytes);
        let hint = hint_for(&token);
        Self { token, hint }
    }

    #[must_use]
    pub fn hash(&self) -> String {
        hash_token(&self.token)
    }
}

fn hint_for(token: &str) -> String {
    if token.len() <= 8 {
        return token.to_owned();
    }
    format!("{}...{}", &token[..4], &token[token.len() - 4..])
}

#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.trim().to_uppercase().as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Create a pairing request and return the plaintext token to hand back to
/// whoever asked for it (admin CLI or an in-chat command).
pub async fn create_pairing_token(
    store: &Store,
    config: &PairingConfig,
    connector: Connector,
    workspace_id: &str,
    role: Option<Role>,
) -> Result<PlaintextToken> {
    let plaintext = PlaintextToken::generate();
    let role = role.unwrap_or_else(|| Role::parse(&config.default_role).unwrap_or_default());
    let now = util::timestamp_secs();
    let request = PairingRequest {
        id: util::generate_id("pair"),
        token_hash: plaintext.hash(),
        hint: plaintext.hint.clone(),
        connector,
        role,
        workspace_id: workspace_id.to_owned(),
        expires_at: now + config.token_ttl_secs,
        consumed_at: None,
        created_at: now,
    };
    store.create_pairing_request(&request).await?;
    Ok(plaintext)
}

/// Outcome of redeeming a pairing token.
#[derive(Debug, Clone)]
pub enum RedeemOutcome {
    Granted { role: Role, workspace_id: String },
    NotFound,
    Expired,
}

/// Redeem `token`: looks it up by hash, checks expiry, and marks it
/// consumed. Does not itself create the [`Identity`](crate::domain::Identity) —
/// callers do that with the returned role/workspace.
pub async fn redeem_pairing_token(store: &Store, token: &str) -> Result<RedeemOutcome> {
    let hash = hash_token(token);
    let Some(request) = store.get_pairing_request_by_hash(&hash).await? else {
        return Ok(RedeemOutcome::NotFound);
    };
    if request.consumed_at.is_some() {
        return Ok(RedeemOutcome::NotFound);
    }
    if request.expires_at < util::timestamp_secs() {
        return Ok(RedeemOutcome::Expired);
    }
    store.consume_pairing_request(&request.id).await?;
    Ok(RedeemOutcome::Granted {
        role: request.role,
        workspace_id: request.workspace_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_hint_keeps_first_and_last_four() {
        let token = PlaintextToken::generate();
        assert!(token.hint.contains("..."));
    }

    #[test]
    fn hash_is_case_insensitive() {
        assert_eq!(hash_token("abcd1234"), hash_token("ABCD1234"));
    }

    #[tokio::test]
    async fn redeem_unknown_token_is_not_found() {
        let store = Store::open_in_memory().await.expect("store");
        let outcome = redeem_pairing_token(&store, "NOPE").await.expect("redeem");
        assert!(matches!(outcome, RedeemOutcome::NotFound));
    }

    #[tokio::test]
    async fn create_then_redeem_grants_configured_role() {
        let store = Store::open_in_memory().await.expect("store");
        let config = PairingConfig::default();
        let token = create_pairing_token(&store, &config, Connector::Cli, "ws_1", None)
            .await
            .expect("create");
        let outcome = redeem_pairing_token(&store, &token.token).await.expect("redeem");
        match outcome {
            RedeemOutcome::Granted { role, workspace_id } => {
                assert_eq!(role, Role::Admin);
                assert_eq!(workspace_id, "ws_1");
            }
            other => panic!("expected granted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn redeeming_twice_fails_the_second_time() {
        let store = Store::open_in_memory().await.expect("store");
        let config = PairingConfig::default();
        let token = create_pairing_token(&store, &config, Connector::Cli, "ws_1", None)
            .await
            .expect("create");
        redeem_pairing_token(&store, &token.token).await.expect("first redeem");
        let second = redeem_pairing_token(&store, &token.token).await.expect("redeem");
        assert!(matches!(second, RedeemOutcome::NotFound));
    }
}
