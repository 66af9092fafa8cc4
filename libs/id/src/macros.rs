//! Macros for defining typed ID types.

/// Macro to define a typed numeric ID with a specific prefix.
///
/// This generates a newtype wrapper around an unsigned integer with:
/// - A `PREFIX` constant
/// - `new()` that rejects zero
/// - `parse()` accepting `123` and `{prefix}_123`
/// - `Display` (bare number) and `FromStr` implementations
/// - `Serialize` and `Deserialize` as a JSON number
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_id!(NodeId, u32, "node");
///
/// let node = NodeId::new(11)?;
/// let parsed: NodeId = "node_11".parse()?;
/// assert_eq!(node, parsed);
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $repr:ty, $prefix:literal) => {
        /// A typed ID for this resource type.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($repr);

        impl $name {
            /// The prefix for this ID type.
            pub const PREFIX: &'static str = $prefix;

            /// Creates an ID from its raw value.
            pub fn new(value: $repr) -> Result<Self, $crate::IdError> {
                if value == 0 {
                    return Err($crate::IdError::Zero { kind: Self::PREFIX });
                }
                Ok(Self(value))
            }

            /// Returns the raw value.
            #[must_use]
            pub const fn get(&self) -> $repr {
                self.0
            }

            /// Parses an ID from a string.
            ///
            /// Accepts the bare number or `{prefix}_{number}`.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }

                let digits = match s.split_once('_') {
                    Some((prefix, rest)) => {
                        if prefix != Self::PREFIX {
                            return Err($crate::IdError::InvalidPrefix {
                                expected: Self::PREFIX,
                                actual: prefix.to_string(),
                            });
                        }
                        rest
                    }
                    None => s,
                };

                let value = digits
                    .parse::<$repr>()
                    .map_err(|e| $crate::IdError::InvalidNumber(e.to_string()))?;

                Self::new(value)
            }

            /// Formats the ID with its type prefix.
            #[must_use]
            pub fn prefixed(&self) -> String {
                format!("{}_{}", Self::PREFIX, self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<$repr> for $name {
            type Error = $crate::IdError;

            fn try_from(value: $repr) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for $repr {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                <$repr as serde::Serialize>::serialize(&self.0, serializer)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let value = <$repr as serde::Deserialize>::deserialize(deserializer)?;
                Self::new(value).map_err(serde::de::Error::custom)
            }
        }
    };
}
