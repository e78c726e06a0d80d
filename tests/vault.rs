use anyhow::{Context as _, Result};
use liquid_lpd::domain::Vault;
use liquid_lpd::domain::vault::{Change, FEE_ACCOUNT, MARKET_ACCOUNT_START};
use liquid_lpd::error::DomainError;
use lwk_wollet::ElementsNetwork;

const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon \
                        abandon abandon abandon about";
const PASSPHRASE: &str = "Sup3rS3cr3tP4ssw0rd!";

fn new_vault() -> Result<Vault> {
    Vault::new(MNEMONIC, PASSPHRASE, false).context("create vault")
}

#[test]
fn vault_starts_unlocked_and_locks() -> Result<()> {
    let mut vault = new_vault()?;
    assert!(!vault.is_locked());

    vault.lock();
    assert!(vault.is_locked());

    assert_eq!(
        vault.unlock("wrong passphrase"),
        Err(DomainError::WrongPassphrase)
    );
    assert!(vault.is_locked());

    vault.unlock(PASSPHRASE).expect("unlock");
    assert!(!vault.is_locked());
    Ok(())
}

#[test]
fn restore_credentials_must_match() -> Result<()> {
    let vault = new_vault()?;
    assert!(vault.matches(MNEMONIC, PASSPHRASE));
    assert!(!vault.matches(MNEMONIC, "other"));
    assert!(!vault.matches(
        "legal winner thank year wave sausage worth useful legal winner thank yellow",
        PASSPHRASE
    ));
    Ok(())
}

#[test]
fn invalid_mnemonic_is_rejected() {
    assert!(Vault::new("not a mnemonic", PASSPHRASE, false).is_err());
}

#[test]
fn derivation_advances_counters_and_registers_addresses() -> Result<()> {
    let mut vault = new_vault()?;
    let params = ElementsNetwork::default_regtest().address_params();

    let first = vault
        .derive_next_address(FEE_ACCOUNT, Change::External, params)
        .expect("derive first");
    let second = vault
        .derive_next_address(FEE_ACCOUNT, Change::External, params)
        .expect("derive second");
    let internal = vault
        .derive_next_address(FEE_ACCOUNT, Change::Internal, params)
        .expect("derive internal");

    assert_ne!(first.address, second.address);
    assert_ne!(first.script_hex, second.script_hex);
    assert!(first.address.starts_with("el1"));
    assert_eq!(first.blinding_private_key.len(), 64);
    assert_eq!(first.derivation_path.replace('h', "'"), "0'/0/0");
    assert_eq!(second.derivation_path.replace('h', "'"), "0'/0/1");
    assert_eq!(internal.derivation_path.replace('h', "'"), "0'/1/0");

    let account = vault.accounts.get(&FEE_ACCOUNT).context("fee account")?;
    assert_eq!(account.last_external_index, 2);
    assert_eq!(account.last_internal_index, 1);

    assert_eq!(vault.all_derived_addresses(FEE_ACCOUNT).len(), 3);
    let externals = vault.all_derived_external_addresses(FEE_ACCOUNT);
    assert_eq!(externals.len(), 2);
    assert!(!externals.contains(&internal.address));

    let info = vault.address_info(&first.address).context("address info")?;
    assert_eq!(info.account_index, FEE_ACCOUNT);
    assert_eq!(info.blinding_key, first.blinding_private_key);

    assert_eq!(
        vault.derivation_path_by_script(FEE_ACCOUNT, &first.script_hex),
        Some(first.derivation_path.clone())
    );
    Ok(())
}

#[test]
fn signing_keys_are_recoverable_by_script() -> Result<()> {
    let mut vault = new_vault()?;
    let params = ElementsNetwork::default_regtest().address_params();
    let derived = vault
        .derive_next_address(MARKET_ACCOUNT_START, Change::External, params)
        .expect("derive");

    let key = vault
        .signing_key_by_script(&derived.script_hex)
        .expect("lookup")
        .context("key present")?;
    assert!(!key.secret_bytes().is_empty());

    let missing = vault
        .signing_key_by_script(&("0014".to_string() + &"ff".repeat(20)))
        .expect("lookup");
    assert!(missing.is_none());
    Ok(())
}

#[test]
fn locked_vault_refuses_derivation_but_keeps_blinding_keys() -> Result<()> {
    let mut vault = new_vault()?;
    let params = ElementsNetwork::default_regtest().address_params();
    let derived = vault
        .derive_next_address(FEE_ACCOUNT, Change::External, params)
        .expect("derive");

    vault.lock();
    let err = vault
        .derive_next_address(FEE_ACCOUNT, Change::External, params)
        .unwrap_err();
    assert!(matches!(
        err,
        liquid_lpd::error::ServiceError::Domain(DomainError::WalletLocked)
    ));

    // The crawler can keep unblinding while the vault is locked.
    assert_eq!(
        vault.blinding_key_by_script(&derived.script_hex),
        Some(derived.blinding_private_key.clone())
    );
    Ok(())
}

#[test]
fn serialization_never_carries_the_clear_mnemonic() -> Result<()> {
    let mut vault = new_vault()?;
    let params = ElementsNetwork::default_regtest().address_params();
    vault
        .derive_next_address(MARKET_ACCOUNT_START, Change::External, params)
        .expect("derive");

    let encoded = serde_json::to_string(&vault).context("encode")?;
    assert!(!encoded.contains("abandon"));

    let restored: Vault = serde_json::from_str(&encoded).context("decode")?;
    assert!(restored.is_locked());
    assert_eq!(
        restored.all_derived_addresses(MARKET_ACCOUNT_START),
        vault.all_derived_addresses(MARKET_ACCOUNT_START)
    );
    Ok(())
}

#[test]
fn market_accounts_start_above_the_reserved_range() -> Result<()> {
    let mut vault = new_vault()?;
    let params = ElementsNetwork::default_regtest().address_params();

    assert_eq!(vault.next_market_account(), MARKET_ACCOUNT_START);
    vault
        .derive_next_address(MARKET_ACCOUNT_START, Change::External, params)
        .expect("derive");
    assert_eq!(vault.next_market_account(), MARKET_ACCOUNT_START + 1);
    Ok(())
}
