//! Wire types of the upstream JSON dialects.
//!
//! Upstreams are loose about scalar types: prices arrive as numbers or as
//! strings with thousands separators, timestamps as numbers or numeric
//! strings. The `deserialize_with` helpers below accept both and turn anything
//! unusable into `None`, so one odd field never rejects a whole item.

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct GoldEnvelope {
    #[serde(default)]
    pub gold: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
pub struct CurrencyEnvelope {
    #[serde(default)]
    pub currency: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
pub struct CommodityEnvelope {
    #[serde(default)]
    pub metal_precious: Option<Vec<Value>>,
}

/// Gold, currency and commodity item.
#[derive(Debug, Deserialize)]
pub struct QuoteItem {
    #[serde(default, deserialize_with = "text")]
    pub symbol: Option<String>,

    #[serde(default, deserialize_with = "amount")]
    pub price: Option<f64>,

    #[serde(default, rename = "nameFa", deserialize_with = "text")]
    pub name_fa: Option<String>,

    #[serde(default, deserialize_with = "text")]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "text")]
    pub unit: Option<String>,

    #[serde(default, deserialize_with = "unix_seconds")]
    pub time_unix: Option<i64>,
}

/// Crypto item. `name` doubles as the symbol when no English name is given.
#[derive(Debug, Deserialize)]
pub struct CryptoItem {
    #[serde(default, alias = "nameEn", deserialize_with = "text")]
    pub name_en: Option<String>,

    #[serde(default, rename = "nameFa", deserialize_with = "text")]
    pub name_fa: Option<String>,

    #[serde(default, deserialize_with = "text")]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "amount")]
    pub price_toman: Option<f64>,

    #[serde(default, deserialize_with = "amount")]
    pub price: Option<f64>,

    #[serde(default, deserialize_with = "text")]
    pub unit: Option<String>,

    #[serde(default, deserialize_with = "unix_seconds")]
    pub time_unix: Option<i64>,
}

/// Stock exchange item, keyed by the exchange's column codes.
#[derive(Debug, Deserialize)]
pub struct StockItem {
    /// Ticker.
    #[serde(default, deserialize_with = "text")]
    pub l18: Option<String>,

    /// Company name.
    #[serde(default, deserialize_with = "text")]
    pub l30: Option<String>,

    /// Closing price.
    #[serde(default, deserialize_with = "amount")]
    pub pc: Option<f64>,

    /// Last traded price.
    #[serde(default, deserialize_with = "amount")]
    pub pl: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Number(f64),
    Text(String),
    Other(IgnoredAny),
}

fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Loose::deserialize(d)? {
        Loose::Text(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Loose::Number(_) | Loose::Other(_) => None,
    })
}

/// A finite, strictly positive price.
fn amount<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let value = match Loose::deserialize(d)? {
        Loose::Number(n) => Some(n),
        Loose::Text(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        Loose::Other(_) => None,
    };
    Ok(value.filter(|p| p.is_finite() && *p > 0.0))
}

fn unix_seconds<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Loose::deserialize(d)? {
        Loose::Number(n) if n.is_finite() && n.fract() == 0.0 => Some(n as i64),
        Loose::Text(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}
