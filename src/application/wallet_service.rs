use crate::application::AppContext;
use crate::domain::Vault;
use crate::domain::vault::{Change, FEE_ACCOUNT};
use crate::error::{DomainError, ServiceError};
use crate::storage::vault_repo;

/// Operator-facing wallet management: vault lifecycle and fee-account
/// deposits.
#[derive(Clone)]
pub struct WalletService {
    ctx: AppContext,
}

impl WalletService {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Create the vault on first call; on later calls succeed only when the
    /// supplied credentials match the stored vault, leaving it unlocked.
    pub fn init_or_restore_wallet(
        &self,
        mnemonic: &str,
        passphrase: &str,
    ) -> Result<(), ServiceError> {
        let mut guard = self.ctx.vault.lock().expect("vault mutex poisoned");

        if let Some(vault) = guard.as_mut() {
            if !vault.matches(mnemonic, passphrase) {
                return Err(DomainError::MnemonicAlreadySet.into());
            }
            vault.unlock(passphrase)?;
            return Ok(());
        }

        let is_mainnet = false;
        let vault = Vault::new(mnemonic, passphrase, is_mainnet)
            .map_err(ServiceError::Infra)?;
        self.ctx
            .db
            .run_main(false, |tx| Ok(vault_repo::put(tx, &vault)?))?;
        *guard = Some(vault);
        tracing::info!("vault initialized");
        Ok(())
    }

    /// Unlock the vault. If none exists yet and seed words were supplied in
    /// the daemon config, the vault is created from them on first unlock.
    pub fn unlock_wallet(&self, passphrase: &str) -> Result<(), ServiceError> {
        let mut guard = self.ctx.vault.lock().expect("vault mutex poisoned");
        match guard.as_mut() {
            Some(vault) => vault.unlock(passphrase)?,
            None => {
                let mnemonic = self
                    .ctx
                    .config
                    .mnemonic
                    .clone()
                    .ok_or(DomainError::WalletLocked)?;
                let vault = Vault::new(&mnemonic, passphrase, false)
                    .map_err(ServiceError::Infra)?;
                self.ctx
                    .db
                    .run_main(false, |tx| Ok(vault_repo::put(tx, &vault)?))?;
                *guard = Some(vault);
                tracing::info!("vault restored from configured seed words");
            }
        }
        tracing::info!("vault unlocked");
        Ok(())
    }

    pub fn lock_wallet(&self) -> Result<(), ServiceError> {
        let mut guard = self.ctx.vault.lock().expect("vault mutex poisoned");
        let vault = guard.as_mut().ok_or(DomainError::WalletLocked)?;
        vault.lock();
        tracing::info!("vault locked");
        Ok(())
    }

    /// Derive the next external fee-account address and start observing it.
    /// Returns the address and its blinding private key.
    pub fn deposit_fee_account(&self) -> Result<(String, String), ServiceError> {
        let derived = self.ctx.derive_and_observe(FEE_ACCOUNT, Change::External)?;
        Ok((derived.address, derived.blinding_private_key))
    }
}
