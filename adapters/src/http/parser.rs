//! Category-specific response parsing.
//!
//! Upstream shapes handled here:
//!
//! ```jsonc
//! // gold / currency / commodity: items under a named section
//! { "gold": [ { "symbol": "IR_GOLD_18K", "price": 6870000, "name": "…", "unit": "toman" } ] }
//! { "currency": [ … ] }
//! { "metal_precious": [ … ] }
//!
//! // crypto: top-level array, timestamp in seconds
//! [ { "name_en": "Bitcoin", "name": "…", "price_toman": "6,100,000,000", "time_unix": 1767225600 } ]
//!
//! // stock: top-level array
//! [ { "l18": "FOLD", "l30": "…", "pc": 5210, "pl": 5230 } ]
//! ```
//!
//! Items are decoded one by one into the typed items of [`super::types`].
//! Items without a symbol or a usable price are skipped; a body whose
//! container shape is wrong is a [`FetchError::Malformed`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use market::{Observation, ObservationMeta, SourceCategory};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::fetcher::FetchError;
use crate::http::types::{
    CommodityEnvelope, CryptoItem, CurrencyEnvelope, GoldEnvelope, QuoteItem, StockItem,
};

/// Per-source rewriting applied to every parsed item.
#[derive(Debug, Clone, Default)]
pub struct Normalization {
    /// Upstream symbol → published symbol.
    pub symbol_aliases: HashMap<String, String>,
    /// Upstream symbol → display name. Wins over the name in the payload.
    pub display_names: HashMap<String, String>,
    /// Render ASCII digits of symbols and names as Persian digits.
    pub persian_digits: bool,
}

impl Normalization {
    fn apply(&self, quote: Quote) -> (String, Option<String>) {
        let name = self
            .display_names
            .get(&quote.symbol)
            .cloned()
            .or(quote.name);
        let symbol = self
            .symbol_aliases
            .get(&quote.symbol)
            .cloned()
            .unwrap_or(quote.symbol);

        if self.persian_digits {
            (to_persian_digits(&symbol), name.as_deref().map(to_persian_digits))
        } else {
            (symbol, name)
        }
    }
}

/// Replaces `0`-`9` with `۰`-`۹`.
fn to_persian_digits(s: &str) -> String {
    s.chars()
        .map(|c| match c.to_digit(10) {
            Some(d) => char::from_u32('۰' as u32 + d).unwrap_or(c),
            None => c,
        })
        .collect()
}

/// One usable item, whatever its dialect.
struct Quote {
    symbol: String,
    price: f64,
    name: Option<String>,
    unit: Option<String>,
    time_unix: Option<i64>,
}

trait Item: DeserializeOwned {
    fn into_quote(self) -> Option<Quote>;
}

impl Item for QuoteItem {
    fn into_quote(self) -> Option<Quote> {
        Some(Quote {
            symbol: self.symbol?,
            price: self.price?,
            name: self.name_fa.or(self.name),
            unit: self.unit,
            time_unix: self.time_unix,
        })
    }
}

impl Item for CryptoItem {
    fn into_quote(self) -> Option<Quote> {
        Some(Quote {
            symbol: self.name_en.or_else(|| self.name.clone())?,
            price: self.price_toman.or(self.price)?,
            name: self.name_fa.or(self.name),
            unit: self.unit,
            time_unix: self.time_unix,
        })
    }
}

impl Item for StockItem {
    fn into_quote(self) -> Option<Quote> {
        Some(Quote {
            symbol: self.l18?,
            price: self.pc.or(self.pl)?,
            name: self.l30,
            unit: None,
            time_unix: None,
        })
    }
}

fn malformed(category: SourceCategory, what: impl std::fmt::Display) -> FetchError {
    FetchError::Malformed(format!("{category}: {what}"))
}

/// Items under the category's section; a missing or null section is empty.
fn section<E: DeserializeOwned>(
    category: SourceCategory,
    root: Value,
    items: impl FnOnce(E) -> Option<Vec<Value>>,
) -> Result<Vec<Value>, FetchError> {
    if !root.is_object() {
        return Err(malformed(category, "expected a JSON object"));
    }
    let envelope: E = serde_json::from_value(root).map_err(|e| malformed(category, e))?;
    Ok(items(envelope).unwrap_or_default())
}

fn top_level(category: SourceCategory, root: Value) -> Result<Vec<Value>, FetchError> {
    serde_json::from_value(root)
        .map_err(|e| malformed(category, format!("expected a top-level array: {e}")))
}

/// Decodes every item that fits `T`; the rest are skipped.
fn quotes<T: Item>(items: Vec<Value>) -> Vec<Quote> {
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<T>(item).ok())
        .filter_map(T::into_quote)
        .collect()
}

/// Parses one response body into normalized observations.
///
/// `fetched_at` stamps items that carry no timestamp of their own.
pub fn parse_observations(
    category: SourceCategory,
    source_id: &str,
    body: &str,
    fetched_at: DateTime<Utc>,
    normalization: &Normalization,
) -> Result<Vec<Observation>, FetchError> {
    let root: Value =
        serde_json::from_str(body).map_err(|e| malformed(category, format!("invalid json: {e}")))?;

    let decoded = match category {
        SourceCategory::Gold => quotes::<QuoteItem>(section(category, root, |e: GoldEnvelope| e.gold)?),
        SourceCategory::Currency => {
            quotes::<QuoteItem>(section(category, root, |e: CurrencyEnvelope| e.currency)?)
        }
        SourceCategory::Commodity => {
            quotes::<QuoteItem>(section(category, root, |e: CommodityEnvelope| e.metal_precious)?)
        }
        SourceCategory::Crypto => quotes::<CryptoItem>(top_level(category, root)?),
        SourceCategory::Stock => quotes::<StockItem>(top_level(category, root)?),
    };

    let observations = decoded
        .into_iter()
        .map(|quote| {
            let price = quote.price;
            let unit = quote.unit.clone();
            let timestamp = quote
                .time_unix
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or(fetched_at);
            let (symbol, name) = normalization.apply(quote);

            Observation {
                source_id: source_id.to_string(),
                symbol,
                timestamp,
                price,
                metadata: ObservationMeta { unit, name },
            }
        })
        .collect();

    Ok(observations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fetched_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap()
    }

    fn parse(category: SourceCategory, body: &str) -> Result<Vec<Observation>, FetchError> {
        parse_observations(category, "src", body, fetched_at(), &Normalization::default())
    }

    #[test]
    fn parses_gold_section() {
        let body = r#"{"gold":[
            {"symbol":"IR_GOLD_18K","price":6870000,"name":"Gold 18k","unit":"toman"},
            {"symbol":"IR_COIN_1G","price":"12,500,000"}
        ]}"#;

        let obs = parse(SourceCategory::Gold, body).unwrap();

        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].symbol, "IR_GOLD_18K");
        assert_eq!(obs[0].price, 6_870_000.0);
        assert_eq!(obs[0].metadata.name.as_deref(), Some("Gold 18k"));
        assert_eq!(obs[0].metadata.unit.as_deref(), Some("toman"));
        assert_eq!(obs[0].timestamp, fetched_at());
        assert_eq!(obs[1].price, 12_500_000.0);
        assert!(obs.iter().all(|o| o.source_id == "src"));
    }

    #[test]
    fn applies_symbol_aliases() {
        let normalization = Normalization {
            symbol_aliases: HashMap::from([("IR_GOLD_18K".to_string(), "GOLD18".to_string())]),
            ..Normalization::default()
        };
        let body = r#"{"gold":[{"symbol":"IR_GOLD_18K","price":1}]}"#;

        let obs = parse_observations(SourceCategory::Gold, "gold", body, fetched_at(), &normalization)
            .unwrap();
        assert_eq!(obs[0].symbol, "GOLD18");
    }

    #[test]
    fn display_names_are_looked_up_by_upstream_symbol() {
        let normalization = Normalization {
            symbol_aliases: HashMap::from([("IR_GOLD_18K".to_string(), "GOLD18".to_string())]),
            display_names: HashMap::from([
                ("IR_GOLD_18K".to_string(), "طلای ۱۸ عیار".to_string()),
                ("Bitcoin".to_string(), "بیت‌کوین".to_string()),
            ]),
            ..Normalization::default()
        };

        let gold = r#"{"gold":[{"symbol":"IR_GOLD_18K","price":1,"name":"Gold 18k"}]}"#;
        let obs = parse_observations(SourceCategory::Gold, "gold", gold, fetched_at(), &normalization)
            .unwrap();
        assert_eq!(obs[0].symbol, "GOLD18");
        assert_eq!(obs[0].metadata.name.as_deref(), Some("طلای ۱۸ عیار"));

        let crypto = r#"[{"name_en":"Bitcoin","price":1},{"name_en":"Dogecoin","name":"Doge","price":1}]"#;
        let obs =
            parse_observations(SourceCategory::Crypto, "crypto", crypto, fetched_at(), &normalization)
                .unwrap();
        assert_eq!(obs[0].metadata.name.as_deref(), Some("بیت‌کوین"));
        assert_eq!(obs[1].metadata.name.as_deref(), Some("Doge"));
    }

    #[test]
    fn stock_digits_can_be_rendered_in_persian() {
        let normalization = Normalization {
            persian_digits: true,
            ..Normalization::default()
        };
        let body = r#"[{"l18":"FOLD1","l30":"Foolad 2024","pc":5210}]"#;

        let obs = parse_observations(SourceCategory::Stock, "tse", body, fetched_at(), &normalization)
            .unwrap();
        assert_eq!(obs[0].symbol, "FOLD۱");
        assert_eq!(obs[0].metadata.name.as_deref(), Some("Foolad ۲۰۲۴"));
        assert_eq!(obs[0].price, 5210.0);
    }

    #[test]
    fn currency_and_commodity_use_their_sections() {
        let cur = parse(
            SourceCategory::Currency,
            r#"{"currency":[{"symbol":"USD","price":60000}],"gold":[{"symbol":"X","price":1}]}"#,
        )
        .unwrap();
        assert_eq!(cur.len(), 1);
        assert_eq!(cur[0].symbol, "USD");

        let com = parse(
            SourceCategory::Commodity,
            r#"{"metal_precious":[{"symbol":"XAU","price":2300.5}]}"#,
        )
        .unwrap();
        assert_eq!(com[0].symbol, "XAU");
        assert_eq!(com[0].price, 2300.5);
    }

    #[test]
    fn parses_crypto_array_with_unix_time() {
        let body = r#"[
            {"name_en":"Bitcoin","name":"بیت کوین","price_toman":"6,100,000,000","time_unix":1767225600},
            {"name":"Ethereum","price":"210000000"}
        ]"#;

        let obs = parse(SourceCategory::Crypto, body).unwrap();

        assert_eq!(obs[0].symbol, "Bitcoin");
        assert_eq!(obs[0].price, 6_100_000_000.0);
        assert_eq!(obs[0].timestamp, DateTime::from_timestamp(1_767_225_600, 0).unwrap());
        assert_eq!(obs[1].symbol, "Ethereum");
        assert_eq!(obs[1].timestamp, fetched_at());
    }

    #[test]
    fn parses_stock_array_with_fallback_price() {
        let body = r#"[
            {"l18":"FOLD","l30":"Foolad","pc":5210,"pl":5230},
            {"l18":"KHODRO","pc":0,"pl":2100}
        ]"#;

        let obs = parse(SourceCategory::Stock, body).unwrap();

        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].price, 5210.0);
        assert_eq!(obs[0].metadata.name.as_deref(), Some("Foolad"));
        assert_eq!(obs[1].price, 2100.0);
    }

    #[test]
    fn skips_items_without_symbol_or_price() {
        let body = r#"{"gold":[
            {"price":1},
            {"symbol":"","price":1},
            {"symbol":"A"},
            {"symbol":"B","price":"n/a"},
            {"symbol":"C","price":-5},
            "not an object",
            {"symbol":"OK","price":2}
        ]}"#;

        let obs = parse(SourceCategory::Gold, body).unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].symbol, "OK");
    }

    #[test]
    fn missing_section_is_an_empty_snapshot() {
        assert!(parse(SourceCategory::Gold, r#"{"currency":[]}"#).unwrap().is_empty());
        assert!(parse(SourceCategory::Gold, r#"{"gold":null}"#).unwrap().is_empty());
        assert!(parse(SourceCategory::Stock, "[]").unwrap().is_empty());
    }

    #[test]
    fn wrong_shapes_are_malformed() {
        for (category, body) in [
            (SourceCategory::Gold, "not json"),
            (SourceCategory::Gold, "[]"),
            (SourceCategory::Gold, r#"{"gold":{"symbol":"A"}}"#),
            (SourceCategory::Crypto, r#"{"data":[]}"#),
            (SourceCategory::Stock, "42"),
        ] {
            let err = parse(category, body).unwrap_err();
            assert!(matches!(err, FetchError::Malformed(_)), "{category}: {body}");
        }
    }
}
