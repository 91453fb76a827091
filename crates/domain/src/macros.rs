//! Macro for implementing Display and FromStr for status enums
//!
//! Status enums cross the persistence boundary as lowercase strings. This
//! macro keeps the two conversions in one place per enum: Display renders
//! the canonical string, FromStr parses case-insensitively.

/// Implements Display and FromStr traits for status enums
///
/// # Arguments
///
/// * `$enum_name` - The name of the enum type
/// * `$variant => $str` - Mapping of enum variants to their string
///   representations
#[macro_export]
macro_rules! impl_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Probe {
        Ready,
        Parked,
    }

    impl_status_conversions!(Probe {
        Ready => "ready",
        Parked => "parked",
    });

    #[test]
    fn display_renders_canonical_string() {
        assert_eq!(Probe::Ready.to_string(), "ready");
        assert_eq!(Probe::Parked.to_string(), "parked");
    }

    #[test]
    fn parsing_is_case_insensitive() {
        assert_eq!(Probe::from_str("READY").unwrap(), Probe::Ready);
        assert_eq!(Probe::from_str("Parked").unwrap(), Probe::Parked);
    }

    #[test]
    fn parsing_rejects_unknown_values() {
        let err = Probe::from_str("stuck").unwrap_err();
        assert!(err.contains("Invalid Probe: stuck"));
    }
}
