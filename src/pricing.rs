//! Pure price, discount and tax aggregation over line-item collections.
//!
//! Everything here is stateless and takes an explicit `now`, so totals are
//! reproducible in tests. Expired discounts collapse to the regular price
//! for every calculation that touches them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::item::LineItem;

/// Attribute key of the regular price.
pub const PRICE: &str = "price";
/// Attribute key of the discounted price.
pub const DISCOUNTED_PRICE: &str = "discounted_price";

/// Sum of `quantity * amount` over the items, where `amount` is the value
/// of `key` on each item. For [`DISCOUNTED_PRICE`] an expired discount
/// substitutes the regular price. With `apply_tax`, each amount is grossed
/// up by the item's tax rate before multiplying by quantity.
///
/// An item whose `key` value is absent or not a scalar aborts the whole
/// total to zero, never a partial sum.
pub fn total<'a, I>(items: I, key: &str, apply_tax: bool, now: DateTime<Utc>) -> Decimal
where
    I: IntoIterator<Item = &'a LineItem>,
{
    let mut total = Decimal::ZERO;
    for item in items {
        let Some(mut amount) = item_amount(item, key, now) else {
            return Decimal::ZERO;
        };
        if apply_tax {
            amount += amount * item.tax_rate / Decimal::ONE_HUNDRED;
        }
        total += Decimal::from(item.quantity) * amount;
    }
    total
}

/// Discount percentage between two totals, formatted to `decimals` places
/// and optionally rounded to the nearest integer magnitude (while staying a
/// decimal value). A zero or unchanged price yields zero.
pub fn percentage(price: Decimal, discounted: Decimal, decimals: u32, round: bool) -> Decimal {
    let mut pct = if price.is_zero() || price == discounted {
        Decimal::ZERO
    } else {
        (price - discounted).abs() / price * Decimal::ONE_HUNDRED
    };
    pct = pct.round_dp(decimals);
    if round {
        pct = pct.round();
    }
    pct
}

/// Per-item discount percentage at `now`. Zero when the price is
/// numerically zero, whatever the discounted price says.
pub fn discounted_percentage(item: &LineItem, decimals: u32, round: bool, now: DateTime<Utc>) -> Decimal {
    if item.price.is_zero() {
        return Decimal::ZERO;
    }
    percentage(item.price, item.effective_discounted_price(now), decimals, round)
}

fn item_amount(item: &LineItem, key: &str, now: DateTime<Utc>) -> Option<Decimal> {
    match key {
        PRICE => Some(item.price),
        DISCOUNTED_PRICE => Some(item.effective_discounted_price(now)),
        "tax_rate" => Some(item.tax_rate),
        "qnt" => Some(Decimal::from(item.quantity)),
        "stock_count" => Some(Decimal::from(item.stock_count)),
        "max_cart_count" => Some(Decimal::from(item.max_cart_count)),
        "discount_until" => item.discount_until.map(|until| Decimal::from(until.timestamp())),
        _ => scalar_decimal(item.extra.get(key)?),
    }
}

/// Scalar-to-decimal coercion with loose numeric semantics: booleans count
/// as 0/1, non-numeric strings as zero. `None` for anything non-scalar.
fn scalar_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(number) => number
            .as_i64()
            .map(Decimal::from)
            .or_else(|| number.as_f64().and_then(Decimal::from_f64_retain)),
        serde_json::Value::String(text) => {
            Some(text.trim().parse::<Decimal>().unwrap_or(Decimal::ZERO))
        }
        serde_json::Value::Bool(flag) => Some(Decimal::from(i64::from(*flag))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemRecord;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn item(value: serde_json::Value) -> LineItem {
        let record: ItemRecord = value.as_object().cloned().unwrap_or_default();
        LineItem::from_record(record).unwrap()
    }

    fn two_items() -> Vec<LineItem> {
        vec![
            item(json!({ "qnt": 2, "price": 10, "discounted_price": 8, "tax_rate": 10 })),
            item(json!({ "qnt": 1, "price": 5, "discounted_price": 5, "tax_rate": 10 })),
        ]
    }

    #[test]
    fn total_price_and_tax() {
        let items = two_items();
        let now = Utc::now();
        assert_eq!(total(&items, PRICE, false, now), dec!(25));
        assert_eq!(total(&items, PRICE, true, now), dec!(27.5));
        assert_eq!(total(&items, DISCOUNTED_PRICE, false, now), dec!(21));
    }

    #[test]
    fn expired_discount_falls_back_to_price() {
        let now = Utc::now();
        let mut items = two_items();
        items[0].discount_until = Some(now - Duration::minutes(5));
        assert_eq!(total(&items, DISCOUNTED_PRICE, false, now), dec!(25));

        assert_eq!(discounted_percentage(&items[0], 2, false, now), dec!(0));
        items[0].discount_until = Some(now + Duration::minutes(5));
        assert_eq!(discounted_percentage(&items[0], 2, false, now), dec!(20));
    }

    #[test]
    fn non_scalar_attribute_aborts_to_zero() {
        let now = Utc::now();
        let mut items = two_items();
        assert_eq!(total(&items, "tax_rate", false, now), dec!(30));

        items[1].extra.insert("bundle".into(), json!({ "inner": 1 }));
        assert_eq!(total(&items, "bundle", false, now), dec!(0));
        // absent on one item aborts as well
        items[1].extra.remove("bundle");
        items[0].extra.insert("bundle".into(), json!(3));
        assert_eq!(total(&items, "bundle", false, now), dec!(0));
    }

    #[test]
    fn numeric_strings_are_scalars() {
        let now = Utc::now();
        let items = vec![item(json!({ "qnt": 3, "weight": "2.5" }))];
        assert_eq!(total(&items, "weight", false, now), dec!(7.5));
        let items = vec![item(json!({ "qnt": 3, "weight": "heavy" }))];
        assert_eq!(total(&items, "weight", false, now), dec!(0));
    }

    #[test]
    fn zero_price_percentage_is_zero() {
        let now = Utc::now();
        let free = item(json!({ "qnt": 1, "price": 0, "discounted_price": 3 }));
        assert_eq!(discounted_percentage(&free, 2, false, now), dec!(0));
    }

    #[test]
    fn percentage_formatting_and_rounding() {
        assert_eq!(percentage(dec!(30), dec!(20), 2, false), dec!(33.33));
        assert_eq!(percentage(dec!(30), dec!(20), 2, true), dec!(33));
        assert_eq!(percentage(dec!(10), dec!(10), 2, false), dec!(0));
        assert_eq!(percentage(dec!(0), dec!(5), 2, false), dec!(0));
    }

    #[test]
    fn aggregate_percentage_comes_from_totals() {
        let items = two_items();
        let now = Utc::now();
        let price = total(&items, PRICE, false, now);
        let discounted = total(&items, DISCOUNTED_PRICE, false, now);
        // (25 - 21) / 25 = 16%, not the average of per-item percentages
        assert_eq!(percentage(price, discounted, 2, false), dec!(16));
    }
}
