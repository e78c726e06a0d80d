use liquid_lpd::domain::Unspent;
use liquid_lpd::error::DomainError;
use liquid_lpd::explorer::coin::select_unspents;

const ASSET: &str = "5ac9f65c0efcc4775e0baec4ec03abdde22473cd3cf33c0419ca290e0751b225";
const OTHER_ASSET: &str = "d090c403610fe8a9e31967355929833bc8a8fe08429e630162d1ecbf29fdf28b";

fn coin(value: u64, index: u32) -> Unspent {
    Unspent {
        txid: "ab".repeat(32),
        vout: index,
        value,
        asset: ASSET.to_string(),
        value_commitment: String::new(),
        asset_commitment: String::new(),
        script: "0014".to_string() + &"00".repeat(20),
        nonce: Vec::new(),
        range_proof: Vec::new(),
        surjection_proof: Vec::new(),
        address: "el1qtest".to_string(),
        confirmed: true,
        spent: false,
        locked: false,
        locked_by: None,
    }
}

fn coins(values: &[u64]) -> Vec<Unspent> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| coin(*v, i as u32))
        .collect()
}

#[test]
fn exact_single_match_wins() {
    let unspents = coins(&[100, 250, 400]);
    let (selected, change) = select_unspents(&unspents, 250, ASSET).expect("select");
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].value, 250);
    assert_eq!(change, 0);
}

#[test]
fn cheapest_covering_subset_is_preferred() {
    let unspents = coins(&[61, 61, 61, 3, 1, 1, 1]);
    let (selected, change) = select_unspents(&unspents, 6, ASSET).expect("select");
    let mut values: Vec<u64> = selected.iter().map(|u| u.value).collect();
    values.sort_unstable();
    assert_eq!(values, vec![1, 1, 1, 3]);
    assert_eq!(change, 0);
}

#[test]
fn subset_beats_any_single_when_cheaper() {
    let unspents = coins(&[10, 5, 4]);
    let (selected, change) = select_unspents(&unspents, 9, ASSET).expect("select");
    let mut values: Vec<u64> = selected.iter().map(|u| u.value).collect();
    values.sort_unstable();
    assert_eq!(values, vec![4, 5]);
    assert_eq!(change, 0);
}

#[test]
fn large_candidate_sets_fall_back_to_greedy() {
    let unspents = coins(&[10; 11]);
    let (selected, change) = select_unspents(&unspents, 25, ASSET).expect("select");
    assert_eq!(selected.len(), 3);
    assert_eq!(change, 5);
}

#[test]
fn insufficient_total_is_an_error() {
    let unspents = coins(&[2, 2]);
    let err = select_unspents(&unspents, 6, ASSET).unwrap_err();
    assert_eq!(err, DomainError::InsufficientFunds);
}

#[test]
fn locked_spent_and_foreign_coins_are_ignored() {
    let mut locked = coin(500, 0);
    locked.lock("trade-1").expect("lock");
    let mut spent = coin(500, 1);
    spent.mark_spent();
    let mut foreign = coin(500, 2);
    foreign.asset = OTHER_ASSET.to_string();
    let unconfirmed = {
        let mut u = coin(500, 3);
        u.confirmed = false;
        u
    };

    let err =
        select_unspents(&[locked, spent, foreign, unconfirmed], 400, ASSET).unwrap_err();
    assert_eq!(err, DomainError::InsufficientFunds);
}

#[test]
fn zero_target_is_rejected() {
    let unspents = coins(&[10]);
    let err = select_unspents(&unspents, 0, ASSET).unwrap_err();
    assert_eq!(err, DomainError::InvalidAmount);
}
