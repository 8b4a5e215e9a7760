//! Raw record normalizer.
//!
//! Turns an untyped key/value record (one row of a results sheet) into a
//! [`NewMatch`]. Pure data-shape transformation: no I/O, deterministic output.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use crate::error::NormalizeError;
use crate::model::{NewMatch, NewOdds, NewPlayer, RankSnapshot, Tournament};

/// One raw match record as received from the data source.
pub type RawRecord = Map<String, Value>;

/// Parse a raw record into an unpersisted match with name-only player stubs.
pub fn parse_raw_match(raw: &RawRecord) -> Result<NewMatch, NormalizeError> {
    let date = parse_date(raw)?;
    let (winner, loser) = parse_players(raw)?;

    Ok(NewMatch {
        date,
        comment: text_field(raw, "Comment"),
        winner,
        loser,
        winner_snapshot: RankSnapshot {
            rank: int_field(raw, "WRank")?,
            points: int_field(raw, "WPts")?,
        },
        loser_snapshot: RankSnapshot {
            rank: int_field(raw, "LRank")?,
            points: int_field(raw, "LPts")?,
        },
        tournament: Tournament {
            name: text_field(raw, "Tournament"),
            series: text_field(raw, "Series"),
            surface: text_field(raw, "Surface"),
            court: text_field(raw, "Court"),
            round: text_field(raw, "Round"),
            location: text_field(raw, "Location"),
        },
        odds: parse_odds(raw)?,
    })
}

/// Winner and loser stubs. Identity resolution happens in the store.
pub fn parse_players(raw: &RawRecord) -> Result<(NewPlayer, NewPlayer), NormalizeError> {
    let winner = text_field(raw, "Winner").ok_or(NormalizeError::MissingField("Winner"))?;
    let loser = text_field(raw, "Loser").ok_or(NormalizeError::MissingField("Loser"))?;

    if winner == loser {
        return Err(NormalizeError::SamePlayer(winner));
    }

    Ok((NewPlayer { name: winner }, NewPlayer { name: loser }))
}

/// Collect every `<Bookmaker>W` / `<Bookmaker>L` pair.
///
/// Keys whose last character is `W` or `L` are odds keys; the bookmaker is
/// the key minus that character. A bookmaker quoting only one side rejects
/// the whole record. Bookmakers come out sorted by label.
pub fn parse_odds(raw: &RawRecord) -> Result<Vec<NewOdds>, NormalizeError> {
    let bookmakers: BTreeSet<&str> = raw
        .keys()
        .filter_map(|k| k.strip_suffix('W').or_else(|| k.strip_suffix('L')))
        .filter(|prefix| !prefix.is_empty())
        .collect();

    let mut odds = Vec::with_capacity(bookmakers.len());
    for bookmaker in bookmakers {
        let (Some(w), Some(l)) = (
            raw.get(&format!("{bookmaker}W")),
            raw.get(&format!("{bookmaker}L")),
        ) else {
            return Err(NormalizeError::UnpairedOdds(bookmaker.to_string()));
        };

        let winner = price(bookmaker, 'W', w)?;
        let loser = price(bookmaker, 'L', l)?;

        // Sheets leave both cells empty when a bookmaker did not price the match
        if winner.is_none() && loser.is_none() {
            continue;
        }

        odds.push(NewOdds {
            bookmaker: bookmaker.to_string(),
            winner,
            loser,
        });
    }

    Ok(odds)
}

fn price(bookmaker: &str, side: char, value: &Value) -> Result<Option<f64>, NormalizeError> {
    let invalid = || NormalizeError::InvalidField {
        field: format!("{bookmaker}{side}"),
        value: value.to_string(),
    };

    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_f64().map(Some).ok_or_else(invalid),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s.trim().parse::<f64>().map(Some).map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

fn parse_date(raw: &RawRecord) -> Result<NaiveDate, NormalizeError> {
    let value = match raw.get("Date") {
        None | Some(Value::Null) => return Err(NormalizeError::MissingField("Date")),
        Some(v) => v,
    };

    let invalid = || NormalizeError::InvalidField {
        field: "Date".to_string(),
        value: value.to_string(),
    };

    let Value::String(s) = value else {
        return Err(invalid());
    };
    let s = s.trim();

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.date_naive())
        .map_err(|_| invalid())
}

fn text_field(raw: &RawRecord, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn int_field(raw: &RawRecord, key: &str) -> Result<Option<i32>, NormalizeError> {
    let Some(value) = raw.get(key) else {
        return Ok(None);
    };

    let invalid = || NormalizeError::InvalidField {
        field: key.to_string(),
        value: value.to_string(),
    };

    let as_int = |f: f64| -> Result<Option<i32>, NormalizeError> {
        if f.fract() == 0.0 && f >= i32::MIN as f64 && f <= i32::MAX as f64 {
            Ok(Some(f as i32))
        } else {
            Err(invalid())
        }
    };

    match value {
        Value::Null => Ok(None),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i32::try_from(i).map(Some).map_err(|_| invalid()),
            None => as_int(n.as_f64().ok_or_else(invalid)?),
        },
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => as_int(s.trim().parse::<f64>().map_err(|_| invalid())?),
        _ => Err(invalid()),
    }
}
