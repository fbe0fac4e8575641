use chrono::{Days, NaiveDate};
use num_bigint::{BigInt, ParseBigIntError};
use num_traits::Num;
use thiserror::Error;

// DICOM DA values are `YYYYMMDD`, the hyphenated form is accepted as well because it shows up in
// the wild
const DATE_SUPPORTED_FORMATS: [&str; 2] = ["%Y%m%d", "%Y-%m-%d"];

// shifted dates move back by at most ten years
const DATE_SHIFT_MAX_DAYS: u64 = 10 * 365;

#[derive(Error, Debug, PartialEq)]
pub(crate) enum Error {
    #[error("Invalid input: {}", .0.to_lowercase())]
    InvalidInput(String),
}

impl From<ParseBigIntError> for Error {
    fn from(err: ParseBigIntError) -> Self {
        Error::InvalidInput(format!("{err}"))
    }
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) trait Hasher {
    /// Hashes the input into a string of decimal digits.
    fn hash(&self, input: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Blake3Hasher;

impl Hasher for Blake3Hasher {
    fn hash(&self, input: &str) -> Result<String> {
        let hash = blake3::hash(input.as_bytes());
        let hash_as_number = BigInt::from_str_radix(hash.to_hex().as_str(), 16)?;
        Ok(hash_as_number.to_string())
    }
}

/// Hashes a field value, optionally keeping only the first `length` digits.
pub(crate) fn hash_value<H: Hasher>(hasher: &H, value: &str, length: Option<usize>) -> Result<String> {
    let digits = hasher.hash(value)?;
    Ok(match length {
        Some(length) => digits.chars().take(length).collect(),
        None => digits,
    })
}

/// Moves a date back by a number of days derived from the hash of `seed`, so that all dates
/// sharing a seed keep their relative distance. Any time remainder after the date is kept.
pub(crate) fn shift_date<H: Hasher>(hasher: &H, date: &str, seed: &str) -> Result<String> {
    let (parsed, remainder, format) = DATE_SUPPORTED_FORMATS
        .iter()
        .find_map(|&format| {
            NaiveDate::parse_and_remainder(date, format)
                .ok()
                .map(|(parsed, remainder)| (parsed, remainder, format))
        })
        .ok_or_else(|| Error::InvalidInput(format!("unable to parse date from {date}")))?;

    let digits = hasher.hash(seed)?;
    let offset: u64 = digits
        .chars()
        .take(4)
        .collect::<String>()
        .parse()
        .map_err(|_| Error::InvalidInput(format!("hash of {seed} is not numeric")))?;
    let offset = match offset % DATE_SHIFT_MAX_DAYS {
        0 => 1,
        days => days,
    };

    let shifted = parsed
        .checked_sub_days(Days::new(offset))
        .ok_or_else(|| Error::InvalidInput(format!("unable to shift date {date}")))?;
    Ok(shifted.format(format).to_string() + remainder)
}
