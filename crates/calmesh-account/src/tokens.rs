//! Token envelope operations
//!
//! Refresh tokens are decrypted here and nowhere else. Every decrypt
//! outcome feeds the encryption monitor; failures additionally emit a
//! critical structured log.

use tracing::{debug, error};

use calmesh_crypto::{self as crypto, DekBackup, Envelope, MasterKey, TokenSet};
use calmesh_types::{time, CalError, Result};

use crate::actor::AccountActor;
use crate::REFRESH_BUFFER_MILLIS;

impl AccountActor {
    async fn load_envelope(&self) -> Result<Envelope> {
        let (envelope_json, _scopes) = self
            .ctx
            .store
            .auth()
            .get_envelope(self.ctx.account_id)
            .await?
            .ok_or(CalError::NoTokens)?;
        serde_json::from_str(&envelope_json).map_err(|_| CalError::CryptoFailure)
    }

    /// Decrypt stored tokens, updating the encryption monitor either way
    async fn load_tokens(&self, master: &MasterKey) -> Result<TokenSet> {
        let envelope = self.load_envelope().await?;
        match crypto::decrypt(master, &envelope) {
            Ok(tokens) => {
                self.ctx
                    .store
                    .auth()
                    .record_decrypt_success(self.ctx.account_id, time::now_millis())
                    .await?;
                Ok(tokens)
            }
            Err(e) => {
                error!(
                    account_id = %self.ctx.account_id,
                    error_code = e.error_code(),
                    "CRITICAL: token envelope decrypt failed"
                );
                self.ctx
                    .store
                    .auth()
                    .record_decrypt_failure(
                        self.ctx.account_id,
                        time::now_millis(),
                        &e.to_string(),
                    )
                    .await?;
                Err(CalError::CryptoFailure)
            }
        }
    }

    async fn store_envelope(&self, envelope: &Envelope) -> Result<()> {
        let envelope_json =
            serde_json::to_string(envelope).map_err(|_| CalError::CryptoFailure)?;
        self.ctx
            .store
            .auth()
            .replace_envelope(self.ctx.account_id, &envelope_json, time::now_millis())
            .await
    }

    pub(crate) async fn initialize(&self, tokens: TokenSet, scopes: &str) -> Result<()> {
        let envelope = crypto::encrypt(&self.ctx.master_key, &tokens)?;
        let envelope_json =
            serde_json::to_string(&envelope).map_err(|_| CalError::CryptoFailure)?;
        self.ctx
            .store
            .auth()
            .upsert_envelope(self.ctx.account_id, &envelope_json, scopes, time::now_millis())
            .await?;
        debug!(account_id = %self.ctx.account_id, "Credentials initialised");
        Ok(())
    }

    /// Just-in-time access token mint. Returns the cached token while it is
    /// comfortably fresh; otherwise refreshes against the provider and
    /// replaces the envelope atomically.
    pub(crate) async fn get_access_token(&self) -> Result<String> {
        let tokens = self.load_tokens(&self.ctx.master_key).await?;
        let now = time::now_millis();
        if tokens.expiry - now > REFRESH_BUFFER_MILLIS {
            return Ok(tokens.access_token.clone());
        }

        let grant = self
            .ctx
            .tokens
            .refresh(self.ctx.provider, &tokens.refresh_token)
            .await?;
        let refreshed = TokenSet {
            access_token: grant.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expiry: now + grant.expires_in * 1000,
        };
        let envelope = crypto::encrypt(&self.ctx.master_key, &refreshed)?;
        self.store_envelope(&envelope).await?;
        debug!(account_id = %self.ctx.account_id, "Access token refreshed");
        Ok(grant.access_token)
    }

    /// Best-effort server-side revoke; the local row is deleted regardless
    /// of the server outcome.
    pub(crate) async fn revoke_tokens(&self) -> Result<bool> {
        let revoked = match self.load_tokens(&self.ctx.master_key).await {
            Ok(tokens) => self
                .ctx
                .tokens
                .revoke(self.ctx.provider, &tokens.refresh_token)
                .await
                .unwrap_or(false),
            // Nothing decryptable to revoke server-side; still delete local
            Err(_) => false,
        };

        let deleted = self.ctx.store.auth().delete(self.ctx.account_id).await?;
        debug!(
            account_id = %self.ctx.account_id,
            revoked,
            deleted,
            "Tokens revoked"
        );
        Ok(match self.ctx.provider {
            calmesh_types::Provider::Google => revoked,
            calmesh_types::Provider::Microsoft => deleted,
        })
    }

    /// Atomic within the actor: the new envelope is stored in a single
    /// replace, and any failure before that leaves the old envelope intact.
    pub(crate) async fn rotate_key(
        &self,
        old_master: &MasterKey,
        new_master: &MasterKey,
    ) -> Result<()> {
        let envelope = self.load_envelope().await?;
        let rotated = crypto::re_encrypt_dek(old_master, new_master, &envelope)?;
        self.store_envelope(&rotated).await?;
        debug!(account_id = %self.ctx.account_id, "Master key rotated");
        Ok(())
    }

    pub(crate) async fn get_dek_backup(&self) -> Result<DekBackup> {
        let envelope = self.load_envelope().await?;
        Ok(crypto::extract_dek_backup(
            self.ctx.account_id,
            &envelope,
            time::now_millis(),
        ))
    }

    pub(crate) async fn restore_dek_backup(&self, backup: &DekBackup) -> Result<()> {
        let envelope = self.load_envelope().await?;
        let restored = crypto::restore_dek_from_backup(&envelope, backup);
        self.store_envelope(&restored).await
    }
}
