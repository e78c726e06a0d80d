use crate::domain::Unspent;
use crate::error::DomainError;

/// Subset enumeration is capped at this many candidates; larger sets fall
/// back to greedy selection.
const COMBINATION_CAP: usize = 10;

/// Pick unspents of `asset` covering `target`, preferring an exact single
/// match, then the cheapest covering subset, then greedy descending values.
/// Returns the selection and the change left over.
pub fn select_unspents(
    unspents: &[Unspent],
    target: u64,
    asset: &str,
) -> Result<(Vec<Unspent>, u64), DomainError> {
    if target == 0 {
        return Err(DomainError::InvalidAmount);
    }

    let mut candidates: Vec<&Unspent> = unspents
        .iter()
        .filter(|u| u.asset == asset && u.is_available() && u.value > 0)
        .collect();

    let total: u128 = candidates.iter().map(|u| u.value as u128).sum();
    if total < target as u128 {
        return Err(DomainError::InsufficientFunds);
    }

    if let Some(exact) = candidates.iter().find(|u| u.value == target) {
        return Ok((vec![(*exact).clone()], 0));
    }

    candidates.sort_by(|a, b| b.value.cmp(&a.value));

    if candidates.len() <= COMBINATION_CAP {
        if let Some(selected) = best_combination(&candidates, target) {
            let sum: u64 = selected.iter().map(|u| u.value).sum();
            return Ok((selected, sum - target));
        }
    }

    // Greedy fallback over descending values.
    let mut selected = Vec::new();
    let mut sum: u64 = 0;
    for u in candidates {
        selected.push(u.clone());
        sum = sum.saturating_add(u.value);
        if sum >= target {
            return Ok((selected, sum - target));
        }
    }

    Err(DomainError::InsufficientFunds)
}

/// Minimum-sum covering subset; ties broken by fewest coins.
fn best_combination(candidates: &[&Unspent], target: u64) -> Option<Vec<Unspent>> {
    let n = candidates.len();
    let mut best: Option<(u128, u32, u32)> = None; // (sum, count, mask)

    for mask in 1u32..(1 << n) {
        let mut sum: u128 = 0;
        for (i, u) in candidates.iter().enumerate() {
            if mask & (1 << i) != 0 {
                sum += u.value as u128;
            }
        }
        if sum < target as u128 {
            continue;
        }
        let count = mask.count_ones();
        let better = match &best {
            None => true,
            Some((best_sum, best_count, _)) => {
                sum < *best_sum || (sum == *best_sum && count < *best_count)
            }
        };
        if better {
            best = Some((sum, count, mask));
        }
    }

    best.map(|(_, _, mask)| {
        candidates
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << *i) != 0)
            .map(|(_, u)| (*u).clone())
            .collect()
    })
}
