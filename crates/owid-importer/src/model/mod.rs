//! Domain types for jobs and their units of work.

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum
/// stored as TEXT.
macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(other.to_string()),
                }
            }
        }
    };
}

pub(crate) use text_enum;

pub mod job;
pub mod unit;

pub use job::{Job, JobKind, JobParams, JobStatus, OverwritePolicy};
pub use unit::{LeafFill, Unit, UnitKey, UnitKind, UnitStatus};

/// Parses a TEXT column into its enum, reporting the column on failure.
pub(crate) fn parse_column<T: std::str::FromStr>(
    column: &'static str,
    value: &str,
) -> Result<T, crate::db::DatabaseError> {
    value
        .parse()
        .map_err(|_| crate::db::DatabaseError::InvalidValue {
            column,
            value: value.to_string(),
        })
}
