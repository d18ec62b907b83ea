use anyhow::{Result, bail};

use tally_core::models::{QUICK_ADD_WATER_ML, RECOMMENDED_WATER_RANGE_ML};

use crate::app::App;

/// Resolve the amount from either an explicit value or a 1-based quick-add slot.
fn resolve_amount(amount_ml: Option<i64>, quick: Option<usize>) -> Result<i64> {
    match (amount_ml, quick) {
        (Some(ml), None) => Ok(ml),
        (None, Some(slot)) => match slot.checked_sub(1).and_then(|i| QUICK_ADD_WATER_ML.get(i)) {
            Some(ml) => Ok(*ml),
            None => bail!(
                "Quick amount must be 1-{} ({})",
                QUICK_ADD_WATER_ML.len(),
                QUICK_ADD_WATER_ML
                    .iter()
                    .map(|ml| format!("{ml} ml"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        },
        (Some(_), Some(_)) => bail!("Give either an amount or --quick, not both"),
        (None, None) => bail!("Give an amount in ml or --quick 1-{}", QUICK_ADD_WATER_ML.len()),
    }
}

pub(crate) fn cmd_water(
    app: &App,
    amount_ml: Option<i64>,
    quick: Option<usize>,
    json: bool,
) -> Result<()> {
    let user = app.require_session()?.user.id;
    let amount = resolve_amount(amount_ml, quick)?;
    let water = app.service.add_water(&user, amount)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&water)?);
        return Ok(());
    }
    let total = app.service.totals_today(&user)?.total_water_ml;
    let (low, high) = RECOMMENDED_WATER_RANGE_ML;
    println!("Logged {} ml (today: {total} ml)", water.amount_ml);
    if total < low {
        println!("  {} ml to go for the recommended {low}-{high} ml", low - total);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_amount() {
        assert_eq!(resolve_amount(Some(330), None).unwrap(), 330);
        assert_eq!(resolve_amount(None, Some(1)).unwrap(), 250);
        assert_eq!(resolve_amount(None, Some(3)).unwrap(), 750);
    }

    #[test]
    fn test_resolve_amount_invalid() {
        assert!(resolve_amount(None, Some(0)).is_err());
        assert!(resolve_amount(None, Some(4)).is_err());
        assert!(resolve_amount(Some(250), Some(1)).is_err());
        assert!(resolve_amount(None, None).is_err());
    }
}
