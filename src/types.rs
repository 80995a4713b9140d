use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

/// A student record as stored in a roster file.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Student {
    /// Student name.
    pub name: String,

    /// Group the student belongs to. Used as the output file stem.
    pub group: String,

    /// Date (and time of day, usually midnight) of birth, with no time zone.
    pub date_of_birth: NaiveDateTime,

    /// Exact average score. Its scale is kept, so `4.50` renders as `4.50`.
    pub average_score: Decimal,
}

impl Student {
    pub fn new(
        name: impl Into<String>,
        group: impl Into<String>,
        date_of_birth: NaiveDateTime,
        average_score: Decimal,
    ) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            date_of_birth,
            average_score,
        }
    }

    /// The calendar date of birth.
    pub fn birth_date(&self) -> NaiveDate {
        self.date_of_birth.date()
    }
}

/// Instantiate a `Student` with a tuple-like syntax.
///
/// The score is given as a string literal so that its scale is kept exactly,
/// e.g. `student!("Alice", "G1", (1990, 1, 1), "4.50")`.
#[macro_export]
macro_rules! student {
    ( $name:expr, $group:expr, ( $y:expr, $m:expr, $d:expr ), $score:expr ) => {
        $crate::types::Student::new(
            $name,
            $group,
            ::chrono::NaiveDate::from_ymd_opt($y, $m, $d)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .ok_or_else(|| ::anyhow::anyhow!("invalid date in student! literal"))?,
            <::rust_decimal::Decimal as ::std::str::FromStr>::from_str($score)?,
        )
    };
}

/// Instantiate a vec of `Student` with tuple-like syntax.
#[macro_export]
macro_rules! students {
    ( $( ( $name:expr, $group:expr, ( $y:expr, $m:expr, $d:expr ), $score:expr $(,)? ) ),* $(,)? ) => {
        vec![ $( $crate::student!($name, $group, ($y, $m, $d), $score) ),* ]
    };
}
