use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use super::types::{Calendar, Year};

/// How a series is extended over years it does not cover.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Pad {
    Zero,
    Hold,
}

/// A year-indexed numeric series. Serialized as a `year -> value` map.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Series(BTreeMap<Year, f64>);

// Keys are read as strings so series survive buffered (flattened/untagged) decoding.
impl<'de> Deserialize<'de> for Series {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, f64>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(year, value)| {
                year.trim()
                    .parse::<Year>()
                    .map(|year| (year, value))
                    .map_err(|_| D::Error::custom(format!("series key `{year}` is not a year")))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Series)
    }
}

impl Series {
    pub fn constant(calendar: &Calendar, value: f64) -> Self {
        Self(calendar.years().map(|year| (year, value)).collect())
    }

    pub fn zeros(calendar: &Calendar) -> Self {
        Self::constant(calendar, 0.0)
    }

    pub fn from_pairs<I: IntoIterator<Item = (Year, f64)>>(pairs: I) -> Self {
        Self(pairs.into_iter().collect())
    }

    /// `values[i]` lands on `start + i`.
    pub fn from_values(start: Year, values: &[f64]) -> Self {
        Self(
            values
                .iter()
                .enumerate()
                .map(|(offset, value)| (start + offset as Year, *value))
                .collect(),
        )
    }

    pub fn get(&self, year: Year) -> f64 {
        self.0.get(&year).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, year: Year, value: f64) {
        self.0.insert(year, value);
    }

    pub fn add(&mut self, year: Year, amount: f64) {
        *self.0.entry(year).or_insert(0.0) += amount;
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first_year(&self) -> Option<Year> {
        self.0.keys().next().copied()
    }

    pub fn last_year(&self) -> Option<Year> {
        self.0.keys().next_back().copied()
    }

    pub fn years(&self) -> impl Iterator<Item = Year> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Year, f64)> + '_ {
        self.0.iter().map(|(year, value)| (*year, *value))
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn is_all_zero(&self) -> bool {
        self.0.values().all(|value| *value == 0.0)
    }

    /// Re-index onto `calendar`: interior gaps become 0, years before the
    /// first entry are padded per `front`, years after the last per `back`,
    /// and years outside the calendar are dropped.
    pub fn conform(&self, calendar: &Calendar, front: Pad, back: Pad) -> Series {
        let (Some(first), Some(last)) = (self.first_year(), self.last_year()) else {
            return Series::zeros(calendar);
        };
        let front_value = match front {
            Pad::Zero => 0.0,
            Pad::Hold => self.get(first),
        };
        let back_value = match back {
            Pad::Zero => 0.0,
            Pad::Hold => self.get(last),
        };
        Series(
            calendar
                .years()
                .map(|year| {
                    let value = if year < first {
                        front_value
                    } else if year > last {
                        back_value
                    } else {
                        self.get(year)
                    };
                    (year, value)
                })
                .collect(),
        )
    }

    /// Standard re-indexing used by every entity: zero outside the known range.
    pub fn standardized(&self, calendar: &Calendar) -> Series {
        self.conform(calendar, Pad::Zero, Pad::Zero)
    }

    /// Zero every year outside `[start, end]`.
    pub fn window(&self, start: Year, end: Year) -> Series {
        self.map_with_year(|year, value| if (start..=end).contains(&year) { value } else { 0.0 })
    }

    pub fn map(&self, mut f: impl FnMut(f64) -> f64) -> Series {
        Series(self.0.iter().map(|(year, value)| (*year, f(*value))).collect())
    }

    pub fn map_with_year(&self, mut f: impl FnMut(Year, f64) -> f64) -> Series {
        Series(self.0.iter().map(|(year, value)| (*year, f(*year, *value))).collect())
    }

    /// Combine with `other` over the years of `self`; missing years in `other` read as 0.
    pub fn zip_with(&self, other: &Series, mut f: impl FnMut(f64, f64) -> f64) -> Series {
        self.map_with_year(|year, value| f(value, other.get(year)))
    }

    pub fn scale(&self, factor: f64) -> Series {
        self.map(|value| value * factor)
    }

    pub fn plus(&self, other: &Series) -> Series {
        let mut out = self.clone();
        for (year, value) in other.iter() {
            out.add(year, value);
        }
        out
    }

    pub fn times(&self, other: &Series) -> Series {
        self.zip_with(other, |a, b| a * b)
    }

    pub fn min_with(&self, other: &Series) -> Series {
        self.zip_with(other, f64::min)
    }

    pub fn rounded(&self) -> Series {
        self.map(f64::round)
    }

    pub fn truncated(&self) -> Series {
        self.map(f64::trunc)
    }

    pub fn clamp_min(&self, floor: f64) -> Series {
        self.map(|value| value.max(floor))
    }

    pub fn sum<'a, I: IntoIterator<Item = &'a Series>>(calendar: &Calendar, series: I) -> Series {
        series
            .into_iter()
            .fold(Series::zeros(calendar), |acc, next| acc.plus(next))
    }

    /// Mean over the trailing `window` entries (fewer at the start), in year order.
    pub fn trailing_mean(&self, window: usize) -> Series {
        let window = window.max(1);
        let values: Vec<(Year, f64)> = self.iter().collect();
        Series(
            values
                .iter()
                .enumerate()
                .map(|(idx, (year, _))| {
                    let from = (idx + 1).saturating_sub(window);
                    let slice = &values[from..=idx];
                    let mean = slice.iter().map(|(_, v)| v).sum::<f64>() / slice.len() as f64;
                    (*year, mean)
                })
                .collect(),
        )
    }

    /// Linear interpolation at a fractional year, clamped to the end values.
    pub fn interpolate(&self, at: f64) -> f64 {
        let points: Vec<(Year, f64)> = self.iter().collect();
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return 0.0;
        };
        if at <= first.0 as f64 {
            return first.1;
        }
        if at >= last.0 as f64 {
            return last.1;
        }
        let lower = at.floor() as Year;
        let frac = at - lower as f64;
        let lo = self.get(lower);
        let hi = self.get(lower + 1);
        lo + (hi - lo) * frac
    }
}

/// A proportion, rate or cap that may be a single number or a per-year series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Factor {
    Constant(f64),
    Series(Series),
}

impl Factor {
    pub fn conform(&self, calendar: &Calendar) -> Series {
        match self {
            Factor::Constant(value) => Series::constant(calendar, *value),
            Factor::Series(series) => series.conform(calendar, Pad::Zero, Pad::Hold),
        }
    }
}

impl From<f64> for Factor {
    fn from(value: f64) -> Self {
        Factor::Constant(value)
    }
}

impl From<Series> for Factor {
    fn from(series: Series) -> Self {
        Factor::Series(series)
    }
}

/// Cumulative inflation multiplier per calendar year: 1 up to and including
/// `base_year`, then the product of `(1 + rate)` over `[base_year, year - 1]`.
pub fn cumulative_inflation(rate: &Series, base_year: Year, calendar: &Calendar) -> Series {
    let rate = rate.conform(calendar, Pad::Zero, Pad::Hold);
    let mut factor = 1.0;
    Series::from_pairs(calendar.years().map(|year| {
        if year > base_year {
            factor *= 1.0 + rate.get(year - 1);
        }
        (year, factor)
    }))
}
