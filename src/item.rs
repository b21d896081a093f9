//! Line items and the record form they travel in between tiers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An item as a loose field map: catalog rows, caller overrides and client
/// payloads all move through this shape before becoming a [`LineItem`].
pub type ItemRecord = serde_json::Map<String, serde_json::Value>;

/// One cart line: a product-property reference plus quantity and the pricing
/// and stock attributes cached from the catalog at add time. Attributes the
/// catalog carries beyond the typed core are kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(rename = "qnt", default)]
    pub quantity: i64,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub discounted_price: Decimal,
    /// Discount deadline as epoch seconds; `None` means the discount does
    /// not expire.
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub discount_until: Option<DateTime<Utc>>,
    /// Percentage, e.g. `10` for 10%.
    #[serde(default)]
    pub tax_rate: Decimal,
    #[serde(default)]
    pub stock_count: i64,
    #[serde(default)]
    pub max_cart_count: i64,
    #[serde(flatten)]
    pub extra: ItemRecord,
}

impl LineItem {
    /// Deserialize from the record form. Missing fields fall back to their
    /// defaults, so a minimal `{ "qnt": n }` record is acceptable.
    pub fn from_record(record: ItemRecord) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(record))
    }

    /// Serialize into the record form.
    pub fn to_record(&self) -> ItemRecord {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => ItemRecord::new(),
        }
    }

    /// A discount holds while `discount_until` is unset or still ahead of
    /// `now`; afterwards the discounted price collapses to the regular one.
    pub fn discount_valid(&self, now: DateTime<Utc>) -> bool {
        self.discount_until.map_or(true, |until| until >= now)
    }

    /// The discounted price that is actually in effect at `now`.
    pub fn effective_discounted_price(&self, now: DateTime<Utc>) -> Decimal {
        if self.discount_valid(now) {
            self.discounted_price
        } else {
            self.price
        }
    }
}

/// Recursive merge of `patch` onto `base`; `patch` wins on conflicts,
/// nested objects merge key by key.
pub(crate) fn deep_merge(base: &mut ItemRecord, patch: &ItemRecord) {
    for (key, value) in patch {
        if let serde_json::Value::Object(incoming) = value {
            if let Some(serde_json::Value::Object(existing)) = base.get_mut(key) {
                deep_merge(existing, incoming);
                continue;
            }
        }
        base.insert(key.clone(), value.clone());
    }
}

/// Integer coercion for quantity-like values: numbers truncate, numeric
/// strings parse, anything else collapses to zero.
pub(crate) fn coerce_quantity(value: Option<&serde_json::Value>) -> Option<i64> {
    let value = value?;
    let quantity = match value {
        serde_json::Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        serde_json::Value::String(text) => text
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| text.trim().parse::<f64>().ok().map(|f| f as i64))
            .unwrap_or(0),
        serde_json::Value::Bool(flag) => i64::from(*flag),
        _ => 0,
    };
    Some(quantity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn record(value: serde_json::Value) -> ItemRecord {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn minimal_record_uses_defaults() {
        let item = LineItem::from_record(record(json!({ "qnt": 2 }))).unwrap();
        assert_eq!(item.quantity, 2);
        assert_eq!(item.price, Decimal::ZERO);
        assert!(item.discount_until.is_none());
        assert!(item.extra.is_empty());
    }

    #[test]
    fn extra_attributes_survive_a_round_trip() {
        let item = LineItem::from_record(record(json!({
            "qnt": 1,
            "price": 10.5,
            "color": "green",
            "weight": 2.4
        })))
        .unwrap();
        assert_eq!(item.price, dec!(10.5));
        assert_eq!(item.extra.get("color"), Some(&json!("green")));

        let round = LineItem::from_record(item.to_record()).unwrap();
        assert_eq!(round, item);
    }

    #[test]
    fn discount_validity_window() {
        let now = Utc::now();
        let mut item = LineItem::from_record(record(json!({
            "price": 10,
            "discounted_price": 8
        })))
        .unwrap();
        assert!(item.discount_valid(now));
        assert_eq!(item.effective_discounted_price(now), dec!(8));

        item.discount_until = Some(now - Duration::seconds(1));
        assert!(!item.discount_valid(now));
        assert_eq!(item.effective_discounted_price(now), dec!(10));

        item.discount_until = Some(now + Duration::hours(1));
        assert!(item.discount_valid(now));
    }

    #[test]
    fn deep_merge_patch_wins_and_recurses() {
        let mut base = record(json!({
            "price": 10,
            "meta": { "a": 1, "b": 2 }
        }));
        deep_merge(
            &mut base,
            &record(json!({
                "price": 12,
                "meta": { "b": 3, "c": 4 },
                "note": "x"
            })),
        );
        assert_eq!(
            serde_json::Value::Object(base),
            json!({
                "price": 12,
                "meta": { "a": 1, "b": 3, "c": 4 },
                "note": "x"
            })
        );
    }

    #[test]
    fn quantity_coercion() {
        assert_eq!(coerce_quantity(None), None);
        assert_eq!(coerce_quantity(Some(&json!(4))), Some(4));
        assert_eq!(coerce_quantity(Some(&json!(4.9))), Some(4));
        assert_eq!(coerce_quantity(Some(&json!("3"))), Some(3));
        assert_eq!(coerce_quantity(Some(&json!("oops"))), Some(0));
        assert_eq!(coerce_quantity(Some(&json!(true))), Some(1));
        assert_eq!(coerce_quantity(Some(&json!([1]))), Some(0));
    }
}
