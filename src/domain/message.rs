//! Inbound stream messages: topics, raw envelopes and validated decode.
//!
//! Decoding is two steps. A tagged serde decode on `messageType` rejects
//! invalid JSON and unknown shapes as `MalformedMessage`; field validation
//! then turns the loosely typed wire fields into a [`TradeEvent`] or a
//! [`MarketWindow`], failing with `Validation`.

use crate::domain::error::TradeWindowError;
use crate::domain::trade::{TradeEvent, TradeType};
use crate::domain::window::MarketWindow;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Trades,
    MarketData,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Trades => "trades",
            Topic::MarketData => "market-data",
        }
    }

    /// The `messageType` value a payload on this topic must carry.
    pub fn expected_message_type(&self) -> &'static str {
        match self {
            Topic::Trades => "trades",
            Topic::MarketData => "market",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "trades" => Ok(Topic::Trades),
            "market-data" => Ok(Topic::MarketData),
            other => Err(format!("unknown topic: {other}")),
        }
    }
}

/// One delivery from the message queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: Topic,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(topic: Topic, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic,
            partition: 0,
            offset: 0,
            payload: payload.into(),
        }
    }

    pub fn at(mut self, partition: i32, offset: i64) -> Self {
        self.partition = partition;
        self.offset = offset;
        self
    }
}

/// A validated inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Trade(TradeEvent),
    Market(MarketWindow),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "messageType")]
enum WireMessage {
    #[serde(rename = "trades")]
    Trade(WireTrade),
    #[serde(rename = "market")]
    Market(WireMarket),
}

#[derive(Debug, Deserialize)]
struct WireTrade {
    #[serde(rename = "tradeType", default)]
    trade_type: Option<Value>,
    #[serde(default)]
    volume: Option<Value>,
    #[serde(default)]
    time: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireMarket {
    #[serde(rename = "buyPrice", default)]
    buy_price: Option<Value>,
    #[serde(rename = "sellPrice", default)]
    sell_price: Option<Value>,
    #[serde(rename = "startTime", default)]
    start_time: Option<Value>,
    #[serde(rename = "endTime", default)]
    end_time: Option<Value>,
}

pub fn decode(topic: Topic, payload: &[u8]) -> Result<Inbound, TradeWindowError> {
    let malformed = |reason: String| TradeWindowError::MalformedMessage {
        topic: topic.to_string(),
        reason,
    };

    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(malformed("empty payload".into()));
    }

    let wire: WireMessage =
        serde_json::from_slice(payload).map_err(|e| malformed(e.to_string()))?;

    match (topic, wire) {
        (Topic::Trades, WireMessage::Trade(trade)) => decode_trade(trade).map(Inbound::Trade),
        (Topic::MarketData, WireMessage::Market(market)) => {
            decode_market(market).map(Inbound::Market)
        }
        (_, WireMessage::Trade(_)) => Err(malformed(format!(
            "messageType \"trades\" does not match topic (expected \"{}\")",
            topic.expected_message_type()
        ))),
        (_, WireMessage::Market(_)) => Err(malformed(format!(
            "messageType \"market\" does not match topic (expected \"{}\")",
            topic.expected_message_type()
        ))),
    }
}

fn decode_trade(wire: WireTrade) -> Result<TradeEvent, TradeWindowError> {
    let trade_type = required_text("tradeType", wire.trade_type)?;
    let volume = required_text("volume", wire.volume)?;
    let time = required_text("time", wire.time)?;

    let trade_type: TradeType = trade_type
        .parse()
        .map_err(|e: crate::domain::trade::UnknownTradeType| {
            TradeWindowError::validation("tradeType", e.to_string())
        })?;
    let volume = parse_number("volume", &volume)?;
    if volume <= 0.0 {
        return Err(TradeWindowError::validation("volume", "must be positive"));
    }
    let time = parse_timestamp("time", &time)?;

    Ok(TradeEvent::new(trade_type, volume, time))
}

fn decode_market(wire: WireMarket) -> Result<MarketWindow, TradeWindowError> {
    let buy_price = required_text("buyPrice", wire.buy_price)?;
    let sell_price = required_text("sellPrice", wire.sell_price)?;
    let start_time = required_text("startTime", wire.start_time)?;
    let end_time = required_text("endTime", wire.end_time)?;

    MarketWindow::new(
        parse_timestamp("startTime", &start_time)?,
        parse_timestamp("endTime", &end_time)?,
        parse_number("buyPrice", &buy_price)?,
        parse_number("sellPrice", &sell_price)?,
    )
}

/// Non-empty string, or a JSON number rendered as text.
fn required_text(field: &str, value: Option<Value>) -> Result<String, TradeWindowError> {
    match value {
        None | Some(Value::Null) => Err(TradeWindowError::validation(field, "missing")),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(TradeWindowError::validation(field, "empty"))
        }
        Some(Value::String(s)) => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(TradeWindowError::validation(
            field,
            format!("expected string or number, got {other}"),
        )),
    }
}

fn parse_number(field: &str, text: &str) -> Result<f64, TradeWindowError> {
    let value: f64 = text
        .trim()
        .parse()
        .map_err(|_| TradeWindowError::validation(field, format!("not a number: {text:?}")))?;
    if !value.is_finite() {
        return Err(TradeWindowError::validation(field, "must be finite"));
    }
    Ok(value)
}

/// RFC 3339, or a zone-less date/date-time taken as UTC.
pub fn parse_timestamp(field: &str, text: &str) -> Result<DateTime<Utc>, TradeWindowError> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    Err(TradeWindowError::validation(
        field,
        format!("not a valid timestamp: {text:?}"),
    ))
}
